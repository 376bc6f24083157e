//! Dispatch against the Google Gemini `generateContent` API.
//!
//! Gemini addresses the model in the URL path rather than the request body
//! and authenticates via a `key` query parameter rather than a header, so
//! this module's shape differs slightly from [`super::anthropic`] and
//! [`super::openai`] even though the overall flow is the same.

use config::ChannelConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;

use crate::channel;
use crate::error::LlmError;
use crate::http_client::http_client;
use crate::messages::google::{GenerateContentChunk, GenerateContentRequest, GenerateContentResponse};
use crate::messages::unified::{UnifiedChunk, UnifiedRequest, UnifiedResponse};
use crate::provider::{ChatCompletionStream, status_to_error};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

fn base_url(channel: &ChannelConfig) -> &str {
    channel.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
}

fn api_key<'a>(channel: &'a ChannelConfig, context: &'a RequestContext) -> crate::Result<&'a str> {
    channel
        .api_key
        .as_ref()
        .map(|key| key.expose_secret())
        .or_else(|| context.caller_key.as_ref().map(|key| key.expose_secret()))
        .ok_or_else(|| LlmError::AuthenticationFailed("no Google API key configured for this channel".to_string()))
}

fn prepare_request(channel: &ChannelConfig, mut request: UnifiedRequest, routed_model: &str) -> (String, GenerateContentRequest) {
    request.model = channel::resolve_model_name(channel, routed_model);
    let model = request.model.clone();
    (model, GenerateContentRequest::from(request))
}

pub(crate) async fn chat_completion(
    channel: &ChannelConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<UnifiedResponse> {
    let routed_model = request.model.clone();
    let (model, google_request) = prepare_request(channel, request, &routed_model);

    let url = format!(
        "{}/models/{model}:generateContent?key={}",
        base_url(channel),
        api_key(channel, context)?
    );

    let body = sonic_rs::to_vec(&google_request).map_err(|e| {
        log::error!("Failed to serialize Google request: {e}");
        LlmError::InternalError(None)
    })?;

    let response = http_client()
        .post(url)
        .timeout(channel.timeout)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| crate::provider::connection_error("Google", e))?;

    let status = response.status();
    let response_text = response
        .text()
        .await
        .map_err(|e| LlmError::ConnectionError(format!("Failed to read Google response body: {e}")))?;

    if !status.is_success() {
        log::error!("Google API error ({status}): {response_text}");
        return Err(status_to_error(status.as_u16(), response_text));
    }

    let mut google_response: GenerateContentResponse = sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse Google response: {e}, body: {response_text}");
        LlmError::InternalError(None)
    })?;

    if google_response.candidates.is_empty() {
        log::error!("Google API returned empty candidates array");
        return Err(LlmError::InternalError(None));
    }

    google_response.model_version.get_or_insert_with(|| model.clone());

    let mut unified = UnifiedResponse::from(google_response);
    unified.model = routed_model;
    Ok(unified)
}

pub(crate) async fn chat_completion_stream(
    channel: &ChannelConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<ChatCompletionStream> {
    let routed_model = request.model.clone();
    let (model, google_request) = prepare_request(channel, request, &routed_model);

    let url = format!(
        "{}/models/{model}:streamGenerateContent?alt=sse&key={}",
        base_url(channel),
        api_key(channel, context)?
    );

    let body = sonic_rs::to_vec(&google_request).map_err(|e| {
        log::error!("Failed to serialize Google streaming request: {e}");
        LlmError::InternalError(None)
    })?;

    let response = http_client()
        .post(url)
        .timeout(channel.timeout)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| crate::provider::connection_error("Google", e))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Google streaming API error ({status}): {error_text}");
        return Err(status_to_error(status.as_u16(), error_text));
    }

    let event_stream = response.bytes_stream().eventsource();

    let chunk_stream = futures::stream::unfold((Box::pin(event_stream), model), |(mut stream, model)| async move {
        loop {
            let event = stream.next().await?;

            let Ok(event) = event else {
                log::warn!("SSE parsing error in Google stream");
                continue;
            };

            let Ok(mut chunk) = sonic_rs::from_str::<GenerateContentChunk>(&event.data) else {
                log::warn!("Failed to parse Google streaming chunk: {}", event.data);
                continue;
            };

            chunk.model_version.get_or_insert_with(|| model.clone());
            let unified_chunk = UnifiedChunk::from(chunk);
            return Some((Ok(unified_chunk), (stream, model)));
        }
    });

    Ok(Box::pin(chunk_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_when_unset() {
        let channel: ChannelConfig = toml::from_str(indoc::indoc! {r#"
            provider = "google"
            api_key = "AIza-test"
        "#})
        .unwrap();

        assert_eq!(base_url(&channel), DEFAULT_BASE_URL);
    }

    #[test]
    fn base_url_honors_override() {
        let channel: ChannelConfig = toml::from_str(indoc::indoc! {r#"
            provider = "google"
            api_key = "AIza-test"
            base_url = "https://my-proxy.internal/v1beta"
        "#})
        .unwrap();

        assert_eq!(base_url(&channel), "https://my-proxy.internal/v1beta");
    }
}
