//! Token estimation.
//!
//! Drives routing decisions (long-context detection) and the
//! `/v1/messages/count_tokens` endpoint. Accuracy is a design target, not a
//! correctness condition: estimates are never used for anything the caller
//! is billed on by an upstream provider, only for our own routing and usage
//! reporting.

use crate::messages::unified::{
    UnifiedContent, UnifiedContentContainer, UnifiedImageSource, UnifiedMessage, UnifiedRequest, UnifiedToolResultContent,
};

/// Fixed per-block overheads, calibrated against the OpenAI cookbook's
/// "how to count tokens" guidance.
const IMAGE_BASE_TOKENS: u32 = 85;
const IMAGE_HIGH_DETAIL_TOKENS: u32 = 1105;
const TOOL_USE_BASE_TOKENS: u32 = 50;
const TOOL_RESULT_BASE_TOKENS: u32 = 30;
const TOOL_SCHEMA_OVERHEAD: u32 = 50;

/// Per-message / per-request framing overhead (the canonical `cl100k_base`
/// chat framing rule: https://github.com/openai/openai-cookbook, "How to
/// count tokens with tiktoken").
const TOKENS_PER_MESSAGE: u32 = 3;
const TOKENS_PER_NAME: u32 = 1;
const TOKENS_PER_REPLY_PRIMING: u32 = 3;

/// Which BPE family a model name maps to. Only the family matters for
/// estimation purposes, not the exact model within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodingFamily {
    Cl100kBase,
    O200kBase,
}

/// Resolve a model name to its encoding family by prefix match. Unknown
/// models default to `cl100k_base`, matching the legacy OpenAI default.
fn encoding_family_for(model: &str) -> EncodingFamily {
    let lower = model.to_ascii_lowercase();

    if lower.starts_with("gpt-4o")
        || lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("gpt-5")
        || lower.starts_with("chatgpt-4o")
    {
        EncodingFamily::O200kBase
    } else {
        EncodingFamily::Cl100kBase
    }
}

fn bpe_for(family: EncodingFamily) -> Option<tiktoken_rs::CoreBPE> {
    match family {
        EncodingFamily::Cl100kBase => tiktoken_rs::cl100k_base().ok(),
        EncodingFamily::O200kBase => tiktoken_rs::o200k_base().ok(),
    }
}

/// Count tokens in a single string of text for the given model.
///
/// Uses a loaded reference BPE table when available; otherwise falls back to
/// a cheap heuristic: `max(1, chars/3 + words/4 + punct/10)`, zero for empty
/// input.
pub(crate) fn count_text(s: &str, model: &str) -> u32 {
    if s.is_empty() {
        return 0;
    }

    let family = encoding_family_for(model);

    if let Some(bpe) = bpe_for(family) {
        return bpe.encode_with_special_tokens(s).len() as u32;
    }

    heuristic_count(s)
}

fn heuristic_count(s: &str) -> u32 {
    let chars = s.chars().count() as u32;
    let words = s.split_whitespace().count() as u32;
    let punct = s.chars().filter(|c| c.is_ascii_punctuation()).count() as u32;

    (chars / 3 + words / 4 + punct / 10).max(1)
}

/// Count tokens across a sequence of content blocks for the given model.
pub(crate) fn count_content_blocks(blocks: &[UnifiedContent], model: &str) -> u32 {
    blocks.iter().map(|block| count_content_block(block, model)).sum()
}

fn count_content_block(block: &UnifiedContent, model: &str) -> u32 {
    match block {
        UnifiedContent::Text { text } => count_text(text, model),
        UnifiedContent::Image { source } => match source {
            UnifiedImageSource::Base64 { .. } => IMAGE_BASE_TOKENS + IMAGE_HIGH_DETAIL_TOKENS,
            UnifiedImageSource::Url { .. } => IMAGE_BASE_TOKENS,
        },
        UnifiedContent::ToolUse { name, input, .. } => {
            TOOL_USE_BASE_TOKENS + count_text(name, model) + count_json_value(input, model)
        }
        UnifiedContent::ToolResult { content, .. } => {
            TOOL_RESULT_BASE_TOKENS
                + match content {
                    UnifiedToolResultContent::Text(text) => count_text(text, model),
                    UnifiedToolResultContent::Multiple(texts) => {
                        texts.iter().map(|t| count_text(t, model)).sum()
                    }
                }
        }
        UnifiedContent::Thinking { thinking, .. } => count_text(thinking, model),
    }
}

/// Recursively walk a JSON value, counting keys and string/number leaves as
/// text. Used for tool_use `input` maps, which have no fixed shape.
fn count_json_value(value: &serde_json::Value, model: &str) -> u32 {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| count_text(k, model) + count_json_value(v, model))
            .sum(),
        serde_json::Value::Array(items) => items.iter().map(|v| count_json_value(v, model)).sum(),
        serde_json::Value::String(s) => count_text(s, model),
        serde_json::Value::Number(n) => count_text(&n.to_string(), model),
        serde_json::Value::Bool(_) | serde_json::Value::Null => 1,
    }
}

fn message_text_tokens(message: &UnifiedMessage, model: &str) -> u32 {
    match &message.content {
        UnifiedContentContainer::Text(text) => count_text(text, model),
        UnifiedContentContainer::Blocks(blocks) => count_content_blocks(blocks, model),
    }
}

/// Count the estimated input tokens for a full request: system content,
/// every message, and per-tool schema overhead, plus OpenAI-style per-message
/// framing.
pub(crate) fn count_request(req: &UnifiedRequest, model: &str) -> u32 {
    let mut total = 0u32;

    if let Some(system) = &req.system {
        total += count_text(system, model) + TOKENS_PER_MESSAGE;
    }

    for message in &req.messages {
        total += TOKENS_PER_MESSAGE;
        total += message_text_tokens(message, model);

        // Named messages (tool results carrying a tool_call_id) get the
        // extra `+1` the OpenAI framing rule reserves for a `name` field.
        if message.tool_call_id.is_some() {
            total += TOKENS_PER_NAME;
        }
    }

    if let Some(tools) = &req.tools {
        for tool in tools {
            total += count_text(&tool.function.name, model) + count_text(&tool.function.description, model)
                + TOOL_SCHEMA_OVERHEAD;
        }
    }

    total + TOKENS_PER_REPLY_PRIMING
}

/// Count only the input tokens of a request (no reply-priming overhead),
/// used by the router's long-context detection. Identical to
/// [`count_request`] today but kept distinct since routing and billing are
/// allowed to diverge.
pub(crate) fn count_input_tokens(req: &UnifiedRequest) -> u32 {
    count_request(req, &req.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedArguments, UnifiedFunction, UnifiedFunctionCall, UnifiedRole, UnifiedTool, UnifiedToolCall};

    #[test]
    fn empty_text_counts_zero() {
        assert_eq!(count_text("", "gpt-4"), 0);
    }

    #[test]
    fn heuristic_counts_nonempty_text_at_least_one() {
        assert!(heuristic_count("a") >= 1);
    }

    #[test]
    fn unknown_model_defaults_to_cl100k_family() {
        assert_eq!(encoding_family_for("some-custom-finetune"), EncodingFamily::Cl100kBase);
    }

    #[test]
    fn gpt4o_maps_to_o200k_family() {
        assert_eq!(encoding_family_for("gpt-4o-mini"), EncodingFamily::O200kBase);
    }

    #[test]
    fn image_block_high_detail_adds_large_overhead() {
        let low = count_content_block(
            &UnifiedContent::Image {
                source: UnifiedImageSource::Url {
                    url: "https://example.com/x.png".to_string(),
                },
            },
            "gpt-4",
        );
        let high = count_content_block(
            &UnifiedContent::Image {
                source: UnifiedImageSource::Base64 {
                    media_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                },
            },
            "gpt-4",
        );
        assert_eq!(low, IMAGE_BASE_TOKENS);
        assert_eq!(high, IMAGE_BASE_TOKENS + IMAGE_HIGH_DETAIL_TOKENS);
    }

    #[test]
    fn request_token_count_scales_with_tool_definitions() {
        let base = UnifiedRequest {
            model: "gpt-4".to_string(),
            messages: vec![UnifiedMessage {
                role: UnifiedRole::User,
                content: UnifiedContentContainer::Text("hello there".to_string()),
                tool_calls: None,
                tool_call_id: None,
            }],
            system: None,
            max_tokens: Some(100),
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            metadata: None,
            thinking: None,
        };

        let without_tools = count_request(&base, "gpt-4");

        let mut with_tools = base;
        with_tools.tools = Some(vec![UnifiedTool {
            function: UnifiedFunction {
                name: "get_weather".to_string(),
                description: "Get current weather".to_string(),
                parameters: serde_json::json!({"type": "object"}),
                strict: None,
            },
        }]);

        let with_tools_count = count_request(&with_tools, "gpt-4");

        assert!(with_tools_count > without_tools);
    }

    #[test]
    fn tool_use_block_counts_recurse_into_input() {
        let call = UnifiedToolCall {
            id: "call_1".to_string(),
            function: UnifiedFunctionCall {
                name: "get_weather".to_string(),
                arguments: UnifiedArguments::Value(serde_json::json!({"location": "Paris"})),
            },
        };
        assert!(!format!("{call:?}").is_empty());

        let block = UnifiedContent::ToolUse {
            id: "call_1".to_string(),
            name: "get_weather".to_string(),
            input: serde_json::json!({"location": "Paris"}),
        };
        let count = count_content_block(&block, "gpt-4");
        assert!(count > TOOL_USE_BASE_TOKENS);
    }
}
