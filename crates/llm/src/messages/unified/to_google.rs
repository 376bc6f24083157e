//! Conversions from unified types to Google Gemini protocol types.
//!
//! Gemini diverges from the other two dialects more than they diverge from
//! each other: no separate system role, tool results live in their own
//! `function`-role content entry, and only a narrow subset of JSON Schema
//! keywords survive in a function declaration's `parameters`. The schema
//! sanitizer below is the part of this conversion with no safe shortcut —
//! anything it misses becomes a 400 from Gemini's API instead of from ours.

use serde_json::{Map, Value};

use super::from_google::tool_call_id_to_name;
use crate::messages::{google, unified};

/// JSON Schema keywords Gemini's function-declaration schema accepts.
/// Anything else (`additionalProperties`, `$ref`, `oneOf`, format
/// constraints, ...) is dropped rather than forwarded, since Gemini
/// rejects the request outright on an unrecognized keyword.
const ALLOWED_SCHEMA_KEYS: &[&str] = &["type", "description", "properties", "required", "items", "enum"];

/// Recursively rebuild a JSON Schema value keeping only the keywords Gemini
/// understands. Must be total: any shape of input (including malformed
/// schemas missing a `type`) comes out as *something* Gemini will accept
/// rather than panicking or silently producing invalid JSON.
pub(crate) fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut sanitized = Map::new();
            for key in ALLOWED_SCHEMA_KEYS {
                let Some(value) = map.get(*key) else { continue };
                let cleaned = match *key {
                    "properties" => sanitize_properties(value),
                    "items" => sanitize_schema(value),
                    // A nullable field is often expressed as `type: ["string", "null"]`;
                    // Gemini only accepts a single type string, so keep the first.
                    "type" => match value.as_array().and_then(|types| types.first()) {
                        Some(first) => first.clone(),
                        None => value.clone(),
                    },
                    _ => value.clone(),
                };
                sanitized.insert((*key).to_string(), cleaned);
            }
            // A schema fragment with no recognizable keywords still needs a
            // type or Gemini rejects it; default to an open-ended object.
            if !sanitized.contains_key("type") {
                sanitized.insert("type".to_string(), Value::String("object".to_string()));
            }
            Value::Object(sanitized)
        }
        other => other.clone(),
    }
}

fn sanitize_properties(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sanitized: Map<String, Value> =
                map.iter().map(|(key, schema)| (key.clone(), sanitize_schema(schema))).collect();
            Value::Object(sanitized)
        }
        other => other.clone(),
    }
}

fn generation_config(req: &unified::UnifiedRequest) -> Option<google::GenerationConfig> {
    let config = google::GenerationConfig {
        temperature: req.temperature,
        max_output_tokens: req.max_tokens,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences: req.stop_sequences.clone(),
    };

    let is_default = config.temperature.is_none()
        && config.max_output_tokens.is_none()
        && config.top_p.is_none()
        && config.top_k.is_none()
        && config.stop_sequences.is_none();

    if is_default { None } else { Some(config) }
}

fn tool_choice_to_mode(choice: &unified::UnifiedToolChoice) -> google::FunctionCallingMode {
    match choice {
        unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::None) => google::FunctionCallingMode::None,
        unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Auto) => google::FunctionCallingMode::Auto,
        unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Required) => google::FunctionCallingMode::Any,
        // Gemini's tool config has no per-request "only this function" slot in
        // the shape we model; Any is the closest honest approximation.
        unified::UnifiedToolChoice::Specific { .. } => google::FunctionCallingMode::Any,
    }
}

fn message_to_content(message: unified::UnifiedMessage) -> google::Content {
    let role = match message.role {
        unified::UnifiedRole::User => Some(google::Role::User),
        unified::UnifiedRole::Assistant => Some(google::Role::Model),
        unified::UnifiedRole::Tool => Some(google::Role::Function),
        unified::UnifiedRole::System => Some(google::Role::User),
    };

    let mut parts = match message.content {
        unified::UnifiedContentContainer::Text(text) => {
            if text.is_empty() {
                vec![]
            } else {
                vec![google::Part::Text { text }]
            }
        }
        unified::UnifiedContentContainer::Blocks(blocks) => {
            blocks.into_iter().map(content_block_to_part).collect()
        }
    };

    if let Some(tool_calls) = message.tool_calls {
        for call in tool_calls {
            parts.push(google::Part::FunctionCall {
                function_call: google::FunctionCall {
                    name: call.function.name,
                    args: Value::from(call.function.arguments),
                },
            });
        }
    }

    google::Content { role, parts }
}

fn content_block_to_part(block: unified::UnifiedContent) -> google::Part {
    match block {
        unified::UnifiedContent::Text { text } => google::Part::Text { text },
        unified::UnifiedContent::Image { source } => match source {
            unified::UnifiedImageSource::Base64 { media_type, data } => google::Part::InlineData {
                inline_data: google::InlineData {
                    mime_type: media_type,
                    data,
                },
            },
            unified::UnifiedImageSource::Url { url } => google::Part::Text { text: url },
        },
        unified::UnifiedContent::ToolUse { name, input, .. } => google::Part::FunctionCall {
            function_call: google::FunctionCall { name, args: input },
        },
        unified::UnifiedContent::ToolResult {
            tool_use_id, content, ..
        } => {
            let response = match content {
                unified::UnifiedToolResultContent::Text(text) => {
                    serde_json::json!({ "result": text })
                }
                unified::UnifiedToolResultContent::Multiple(items) => {
                    serde_json::json!({ "result": items })
                }
            };
            google::Part::FunctionResponse {
                function_response: google::FunctionResponse {
                    name: tool_call_id_to_name(&tool_use_id),
                    response,
                },
            }
        }
        unified::UnifiedContent::Thinking { thinking, .. } => google::Part::Text { text: thinking },
    }
}

impl From<unified::UnifiedRequest> for google::GenerateContentRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        let generation_config = generation_config(&req);

        let system_instruction = req.system.map(|text| google::Content {
            role: None,
            parts: vec![google::Part::Text { text }],
        });

        let tools = req.tools.map(|tools| {
            vec![google::Tool {
                function_declarations: tools
                    .into_iter()
                    .map(|tool| google::FunctionDeclaration {
                        name: tool.function.name,
                        description: Some(tool.function.description),
                        parameters: sanitize_schema(&tool.function.parameters),
                    })
                    .collect(),
            }]
        });

        let tool_config = req.tool_choice.as_ref().map(|choice| google::ToolConfig {
            function_calling_config: google::FunctionCallingConfig {
                mode: tool_choice_to_mode(choice),
            },
        });

        Self {
            contents: req.messages.into_iter().map(message_to_content).collect(),
            system_instruction,
            generation_config,
            tools,
            tool_config,
        }
    }
}

impl From<unified::UnifiedResponse> for google::GenerateContentResponse {
    fn from(resp: unified::UnifiedResponse) -> Self {
        let finish_reason = resp.choices.first().and_then(|c| c.finish_reason.as_ref()).map(|reason| match reason {
            unified::UnifiedFinishReason::Stop => google::FinishReason::Stop,
            unified::UnifiedFinishReason::Length => google::FinishReason::MaxTokens,
            unified::UnifiedFinishReason::ContentFilter => google::FinishReason::Safety,
            unified::UnifiedFinishReason::ToolCalls => google::FinishReason::Stop,
        });

        let content = resp
            .choices
            .into_iter()
            .next()
            .map(|choice| message_to_content(choice.message))
            .unwrap_or(google::Content { role: None, parts: vec![] });

        Self {
            candidates: vec![google::Candidate {
                content,
                finish_reason,
                index: 0,
            }],
            usage_metadata: Some(google::UsageMetadata {
                prompt_token_count: resp.usage.prompt_tokens,
                candidates_token_count: resp.usage.completion_tokens,
                total_token_count: resp.usage.total_tokens,
            }),
            model_version: Some(resp.model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_schema_drops_unsupported_keywords() {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "name": {"type": "string", "format": "email", "description": "the user's name"}
            },
            "required": ["name"],
            "$schema": "http://json-schema.org/draft-07/schema#"
        });

        let sanitized = sanitize_schema(&schema);
        assert!(sanitized.get("additionalProperties").is_none());
        assert!(sanitized.get("$schema").is_none());
        assert_eq!(sanitized["properties"]["name"].get("format"), None);
        assert_eq!(sanitized["properties"]["name"]["description"], "the user's name");
    }

    #[test]
    fn sanitize_schema_is_total_for_schema_missing_type() {
        let schema = serde_json::json!({"description": "no type here"});
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["type"], "object");
    }

    #[test]
    fn sanitize_schema_collapses_nullable_type_array_to_first_element() {
        let schema = serde_json::json!({"type": ["string", "null"], "description": "optional name"});
        let sanitized = sanitize_schema(&schema);
        assert_eq!(sanitized["type"], "string");
    }

    #[test]
    fn tool_result_content_recovers_name_from_synthetic_id() {
        let block = unified::UnifiedContent::ToolResult {
            tool_use_id: "get_weather:0".to_string(),
            content: unified::UnifiedToolResultContent::Text("sunny".to_string()),
            is_error: None,
        };

        match content_block_to_part(block) {
            google::Part::FunctionResponse { function_response } => {
                assert_eq!(function_response.name, "get_weather");
            }
            _ => panic!("expected FunctionResponse"),
        }
    }
}
