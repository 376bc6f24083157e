//! Dispatch against the Anthropic Messages API.

use config::ChannelConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;

use crate::channel;
use crate::error::LlmError;
use crate::http_client::http_client;
use crate::messages::anthropic::{AnthropicChatRequest, AnthropicChatResponse};
use crate::messages::unified::{UnifiedRequest, UnifiedResponse};
use crate::provider::{ChatCompletionStream, status_to_error};
use crate::request::RequestContext;
use crate::streaming::AnthropicStreamTranslator;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn base_url(channel: &ChannelConfig) -> &str {
    channel.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
}

fn api_key<'a>(channel: &'a ChannelConfig, context: &'a RequestContext) -> crate::Result<&'a str> {
    channel
        .api_key
        .as_ref()
        .map(|key| key.expose_secret())
        .or_else(|| context.caller_key.as_ref().map(|key| key.expose_secret()))
        .ok_or_else(|| LlmError::AuthenticationFailed("no Anthropic API key configured for this channel".to_string()))
}

fn prepare_request(channel: &ChannelConfig, mut request: UnifiedRequest, routed_model: &str) -> AnthropicChatRequest {
    request.model = channel::resolve_model_name(channel, routed_model);
    AnthropicChatRequest::from(request)
}

pub(crate) async fn chat_completion(
    channel: &ChannelConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<UnifiedResponse> {
    let routed_model = request.model.clone();
    let anthropic_request = prepare_request(channel, request, &routed_model);

    let body = sonic_rs::to_vec(&anthropic_request).map_err(|e| {
        log::error!("Failed to serialize Anthropic request: {e}");
        LlmError::InternalError(None)
    })?;

    let response = http_client()
        .post(format!("{}/messages", base_url(channel)))
        .timeout(channel.timeout)
        .header("x-api-key", api_key(channel, context)?)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| crate::provider::connection_error("Anthropic", e))?;

    let status = response.status();
    let response_text = response
        .text()
        .await
        .map_err(|e| LlmError::ConnectionError(format!("Failed to read Anthropic response body: {e}")))?;

    if !status.is_success() {
        log::error!("Anthropic API error ({status}): {response_text}");
        return Err(status_to_error(status.as_u16(), response_text));
    }

    let anthropic_response: AnthropicChatResponse = sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse Anthropic response: {e}, body: {response_text}");
        LlmError::InternalError(None)
    })?;

    let mut unified = UnifiedResponse::from(anthropic_response);
    unified.model = routed_model;
    Ok(unified)
}

pub(crate) async fn chat_completion_stream(
    channel: &ChannelConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<ChatCompletionStream> {
    let routed_model = request.model.clone();
    let mut anthropic_request = prepare_request(channel, request, &routed_model);
    anthropic_request.stream = Some(true);

    let body = sonic_rs::to_vec(&anthropic_request).map_err(|e| {
        log::error!("Failed to serialize Anthropic streaming request: {e}");
        LlmError::InternalError(None)
    })?;

    let response = http_client()
        .post(format!("{}/messages", base_url(channel)))
        .timeout(channel.timeout)
        .header("x-api-key", api_key(channel, context)?)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| crate::provider::connection_error("Anthropic", e))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Anthropic streaming API error ({status}): {error_text}");
        return Err(status_to_error(status.as_u16(), error_text));
    }

    let event_stream = response.bytes_stream().eventsource();
    let routed_model = routed_model.clone();

    let chunk_stream = futures::stream::unfold(
        (Box::pin(event_stream), AnthropicStreamTranslator::new(routed_model)),
        |(mut stream, mut translator)| async move {
            loop {
                let event = stream.next().await?;

                let Ok(event) = event else {
                    log::warn!("SSE parsing error in Anthropic stream");
                    continue;
                };

                if event.data == "[DONE]" {
                    continue;
                }

                let Ok(anthropic_event) = sonic_rs::from_str(&event.data) else {
                    log::warn!("Failed to parse Anthropic streaming event: {}", event.data);
                    continue;
                };

                if let Some(chunk) = translator.translate(anthropic_event) {
                    return Some((Ok(chunk), (stream, translator)));
                }
            }
        },
    );

    Ok(Box::pin(chunk_stream))
}
