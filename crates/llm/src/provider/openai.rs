//! Dispatch against the OpenAI Chat Completions API.

use config::ChannelConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::ExposeSecret;

use crate::channel;
use crate::error::LlmError;
use crate::http_client::http_client;
use crate::messages::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, ToolChoice, ToolChoiceMode,
};
use crate::messages::unified::{UnifiedChunk, UnifiedRequest, UnifiedResponse};
use crate::provider::{ChatCompletionStream, status_to_error};
use crate::request::RequestContext;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Matches tool names that perform file or shell operations: these tools
/// get a "MUST use" clause appended to their description, and (when
/// `openai_upgrade_file_tool_choice` is set) force `tool_choice` to
/// `required` on weaker models that otherwise narrate instead of calling.
fn file_operation_tool_name_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"(?i)file|write|create|edit|bash|str_replace").expect("valid regex"))
}

/// Applies tool-bearing request shaping: a system-message instruction
/// steering the model toward OpenAI function-calling syntax, a "MUST use"
/// clause on file/shell tool descriptions, and (gated by config) an upgrade
/// of `tool_choice` from `auto`/unset to `required` when any declared tool
/// looks like a file or shell operation — weaker models otherwise describe
/// the action in prose instead of emitting a structured call.
fn shape_tool_bearing_request(request: &mut ChatCompletionRequest, router_config: &config::RouterConfig) {
    let pattern = file_operation_tool_name_pattern();
    let mut has_file_operation_tool = false;

    if let Some(tools) = &mut request.tools {
        for tool in tools.iter_mut() {
            if pattern.is_match(&tool.function.name) {
                has_file_operation_tool = true;
                let description = tool.function.description.get_or_insert_with(String::new);
                if !description.contains("MUST") {
                    if !description.is_empty() {
                        description.push(' ');
                    }
                    description.push_str("You MUST use this tool to perform the action rather than only describing it.");
                }
            }
        }
    }

    const FUNCTION_CALLING_INSTRUCTION: &str =
        "You have access to function calling. When you need to perform an action, respond with a structured tool call rather than describing the action in prose.";

    match request.messages.iter_mut().find(|message| message.role == ChatRole::System) {
        Some(system) => {
            let content = system.content.get_or_insert_with(String::new);
            if !content.contains(FUNCTION_CALLING_INSTRUCTION) {
                if !content.is_empty() {
                    content.push_str("\n\n");
                }
                content.push_str(FUNCTION_CALLING_INSTRUCTION);
            }
        }
        None => request.messages.insert(
            0,
            ChatMessage {
                role: ChatRole::System,
                content: Some(FUNCTION_CALLING_INSTRUCTION.to_string()),
                tool_calls: None,
                tool_call_id: None,
            },
        ),
    }

    if router_config.openai_upgrade_file_tool_choice
        && has_file_operation_tool
        && matches!(request.tool_choice, None | Some(ToolChoice::Mode(ToolChoiceMode::Auto)))
    {
        request.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Required));
    }
}

/// Clamps `max_tokens` to `ceiling`. Upstream OpenAI-compatible endpoints
/// have been seen to reject or silently truncate requests above a few tens
/// of thousands of tokens; the ceiling is configurable rather than hardcoded
/// so a deployment fronting an endpoint with a different limit can adjust it.
fn clamp_max_tokens(request: &mut ChatCompletionRequest, ceiling: u32) {
    if let Some(max_tokens) = request.max_tokens
        && max_tokens > ceiling
    {
        request.max_tokens = Some(ceiling);
    }
}

fn base_url(channel: &ChannelConfig) -> &str {
    channel.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
}

fn api_key<'a>(channel: &'a ChannelConfig, context: &'a RequestContext) -> crate::Result<&'a str> {
    channel
        .api_key
        .as_ref()
        .map(|key| key.expose_secret())
        .or_else(|| context.caller_key.as_ref().map(|key| key.expose_secret()))
        .ok_or_else(|| LlmError::AuthenticationFailed("no OpenAI API key configured for this channel".to_string()))
}

fn prepare_request(
    channel: &ChannelConfig,
    router_config: &config::RouterConfig,
    mut request: UnifiedRequest,
    routed_model: &str,
) -> ChatCompletionRequest {
    request.model = channel::resolve_model_name(channel, routed_model);
    let has_tools = request.tools.as_ref().is_some_and(|tools| !tools.is_empty());
    let mut openai_request = ChatCompletionRequest::from(request);

    if has_tools {
        shape_tool_bearing_request(&mut openai_request, router_config);
    }
    clamp_max_tokens(&mut openai_request, router_config.openai_max_tokens_ceiling);
    openai_request
}

pub(crate) async fn chat_completion(
    channel: &ChannelConfig,
    router_config: &config::RouterConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<UnifiedResponse> {
    let routed_model = request.model.clone();
    let openai_request = prepare_request(channel, router_config, request, &routed_model);

    let body = sonic_rs::to_vec(&openai_request).map_err(|e| {
        log::error!("Failed to serialize OpenAI request: {e}");
        LlmError::InternalError(None)
    })?;

    let response = http_client()
        .post(format!("{}/chat/completions", base_url(channel)))
        .timeout(channel.timeout)
        .header(AUTHORIZATION, format!("Bearer {}", api_key(channel, context)?))
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| crate::provider::connection_error("OpenAI", e))?;

    let status = response.status();
    let response_text = response
        .text()
        .await
        .map_err(|e| LlmError::ConnectionError(format!("Failed to read OpenAI response body: {e}")))?;

    if !status.is_success() {
        log::error!("OpenAI API error ({status}): {response_text}");
        return Err(status_to_error(status.as_u16(), response_text));
    }

    let openai_response: ChatCompletionResponse = sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse OpenAI response: {e}, body: {response_text}");
        LlmError::InternalError(None)
    })?;

    let mut unified = UnifiedResponse::from(openai_response);
    unified.model = routed_model;
    Ok(unified)
}

pub(crate) async fn chat_completion_stream(
    channel: &ChannelConfig,
    router_config: &config::RouterConfig,
    request: UnifiedRequest,
    context: &RequestContext,
) -> crate::Result<ChatCompletionStream> {
    let routed_model = request.model.clone();
    let mut openai_request = prepare_request(channel, router_config, request, &routed_model);
    openai_request.stream = Some(true);

    let body = sonic_rs::to_vec(&openai_request).map_err(|e| {
        log::error!("Failed to serialize OpenAI streaming request: {e}");
        LlmError::InternalError(None)
    })?;

    let response = http_client()
        .post(format!("{}/chat/completions", base_url(channel)))
        .timeout(channel.timeout)
        .header(AUTHORIZATION, format!("Bearer {}", api_key(channel, context)?))
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| crate::provider::connection_error("OpenAI", e))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("OpenAI streaming API error ({status}): {error_text}");
        return Err(status_to_error(status.as_u16(), error_text));
    }

    let event_stream = response.bytes_stream().eventsource();

    let chunk_stream = futures::stream::unfold(
        (Box::pin(event_stream), routed_model),
        |(mut stream, provider_model)| async move {
            loop {
                let event = stream.next().await?;

                let Ok(event) = event else {
                    log::warn!("SSE parsing error in OpenAI stream");
                    continue;
                };

                if event.data == "[DONE]" {
                    return None;
                }

                let Ok(mut chunk) = sonic_rs::from_str::<ChatCompletionChunk>(&event.data) else {
                    log::warn!("Failed to parse OpenAI streaming chunk: {}", event.data);
                    continue;
                };

                chunk.model = provider_model.clone();
                let unified_chunk = UnifiedChunk::from(chunk);
                return Some((Ok(unified_chunk), (stream, provider_model)));
            }
        },
    );

    Ok(Box::pin(chunk_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_when_unset() {
        let channel: ChannelConfig = toml::from_str(indoc::indoc! {r#"
            provider = "openai"
            api_key = "sk-test"
        "#})
        .unwrap();

        assert_eq!(base_url(&channel), DEFAULT_BASE_URL);
    }

    #[test]
    fn base_url_honors_override() {
        let channel: ChannelConfig = toml::from_str(indoc::indoc! {r#"
            provider = "openai"
            api_key = "sk-test"
            base_url = "https://my-proxy.internal/v1"
        "#})
        .unwrap();

        assert_eq!(base_url(&channel), "https://my-proxy.internal/v1");
    }

    fn channel(provider: &str) -> ChannelConfig {
        toml::from_str(&format!("provider = \"{provider}\"\napi_key = \"sk-test\"")).unwrap()
    }

    fn tool_request(tool_name: &str) -> UnifiedRequest {
        use crate::messages::unified::{UnifiedContentContainer, UnifiedFunction, UnifiedMessage, UnifiedRole, UnifiedTool};

        UnifiedRequest {
            model: "gpt-4o".to_string(),
            messages: vec![UnifiedMessage {
                role: UnifiedRole::User,
                content: UnifiedContentContainer::Text("please help".to_string()),
                tool_calls: None,
                tool_call_id: None,
            }],
            system: None,
            max_tokens: Some(100_000),
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            stream: None,
            tools: Some(vec![UnifiedTool {
                function: UnifiedFunction {
                    name: tool_name.to_string(),
                    description: "does a thing".to_string(),
                    parameters: serde_json::json!({"type": "object"}),
                    strict: None,
                },
            }]),
            tool_choice: None,
            parallel_tool_calls: None,
            metadata: None,
            thinking: None,
        }
    }

    #[test]
    fn max_tokens_clamps_to_configured_ceiling() {
        let router_config = config::RouterConfig::default();
        let request = prepare_request(&channel("openai"), &router_config, tool_request("get_weather"), "gpt-4o");
        assert_eq!(request.max_tokens, Some(router_config.openai_max_tokens_ceiling));
    }

    #[test]
    fn file_operation_tool_upgrades_tool_choice_to_required() {
        let router_config = config::RouterConfig::default();
        let request = prepare_request(&channel("openai"), &router_config, tool_request("write_to_file"), "gpt-4o");
        assert!(matches!(request.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::Required))));
        assert!(request.tools.unwrap()[0].function.description.as_ref().unwrap().contains("MUST"));
    }

    #[test]
    fn non_file_tool_leaves_tool_choice_untouched() {
        let router_config = config::RouterConfig::default();
        let request = prepare_request(&channel("openai"), &router_config, tool_request("get_weather"), "gpt-4o");
        assert!(request.tool_choice.is_none());
    }

    #[test]
    fn upgrade_can_be_disabled_via_config() {
        let mut router_config = config::RouterConfig::default();
        router_config.openai_upgrade_file_tool_choice = false;
        let request = prepare_request(&channel("openai"), &router_config, tool_request("write_to_file"), "gpt-4o");
        assert!(request.tool_choice.is_none());
    }

    #[test]
    fn tool_bearing_request_gets_function_calling_system_instruction() {
        let router_config = config::RouterConfig::default();
        let request = prepare_request(&channel("openai"), &router_config, tool_request("get_weather"), "gpt-4o");
        let system = request.messages.iter().find(|m| m.role == ChatRole::System).expect("system message");
        assert!(system.content.as_ref().unwrap().contains("function calling"));
    }
}
