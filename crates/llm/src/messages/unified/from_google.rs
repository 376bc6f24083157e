//! Conversions from Google Gemini protocol types to unified types.

use std::borrow::Cow;

use crate::messages::{google, unified};

/// Gemini never hands back an id for a function call, only a name. We
/// synthesize one as `"{name}:{part_index}"` so [`to_google`] can recover
/// the name a `functionResponse` needs without threading extra state
/// through the conversion.
fn synthetic_tool_call_id(name: &str, part_index: usize) -> String {
    format!("{name}:{part_index}")
}

pub(crate) fn tool_call_id_to_name(id: &str) -> String {
    id.rsplit_once(':').map(|(name, _)| name).unwrap_or(id).to_string()
}

impl From<google::Role> for unified::UnifiedRole {
    fn from(role: google::Role) -> Self {
        match role {
            google::Role::User => unified::UnifiedRole::User,
            google::Role::Model => unified::UnifiedRole::Assistant,
            google::Role::Function => unified::UnifiedRole::Tool,
        }
    }
}

fn part_to_content(part: google::Part, index: usize) -> unified::UnifiedContent {
    match part {
        google::Part::Text { text } => unified::UnifiedContent::Text { text },
        google::Part::InlineData { inline_data } => unified::UnifiedContent::Image {
            source: unified::UnifiedImageSource::Base64 {
                media_type: inline_data.mime_type,
                data: inline_data.data,
            },
        },
        google::Part::FunctionCall { function_call } => unified::UnifiedContent::ToolUse {
            id: synthetic_tool_call_id(&function_call.name, index),
            name: function_call.name,
            input: function_call.args,
        },
        google::Part::FunctionResponse { function_response } => unified::UnifiedContent::ToolResult {
            tool_use_id: synthetic_tool_call_id(&function_response.name, index),
            content: unified::UnifiedToolResultContent::Text(function_response.response.to_string()),
            is_error: None,
        },
    }
}

impl From<google::Content> for unified::UnifiedMessage {
    fn from(content: google::Content) -> Self {
        let role = content.role.map(unified::UnifiedRole::from).unwrap_or(unified::UnifiedRole::User);

        let blocks: Vec<unified::UnifiedContent> = content
            .parts
            .into_iter()
            .enumerate()
            .map(|(index, part)| part_to_content(part, index))
            .collect();

        let tool_calls: Vec<unified::UnifiedToolCall> = blocks
            .iter()
            .filter_map(|block| match block {
                unified::UnifiedContent::ToolUse { id, name, input } => Some(unified::UnifiedToolCall {
                    id: id.clone(),
                    function: unified::UnifiedFunctionCall {
                        name: name.clone(),
                        arguments: unified::UnifiedArguments::Value(input.clone()),
                    },
                }),
                _ => None,
            })
            .collect();

        let tool_call_id = blocks.iter().find_map(|block| match block {
            unified::UnifiedContent::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        });

        Self {
            role,
            content: unified::UnifiedContentContainer::Blocks(blocks),
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id,
        }
    }
}

impl From<google::FinishReason> for unified::UnifiedFinishReason {
    fn from(reason: google::FinishReason) -> Self {
        match reason {
            google::FinishReason::Stop => unified::UnifiedFinishReason::Stop,
            google::FinishReason::MaxTokens => unified::UnifiedFinishReason::Length,
            google::FinishReason::Safety | google::FinishReason::Recitation => {
                unified::UnifiedFinishReason::ContentFilter
            }
            google::FinishReason::Other => unified::UnifiedFinishReason::Stop,
        }
    }
}

impl From<google::UsageMetadata> for unified::UnifiedUsage {
    fn from(usage: google::UsageMetadata) -> Self {
        Self {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
            cache_read_input_tokens: None,
        }
    }
}

impl From<google::GenerateContentResponse> for unified::UnifiedResponse {
    fn from(resp: google::GenerateContentResponse) -> Self {
        let candidate = resp.candidates.into_iter().next();

        let (message, finish_reason) = match candidate {
            Some(candidate) => {
                let message = unified::UnifiedMessage::from(candidate.content);
                let has_tool_calls = message.tool_calls.is_some();
                let finish_reason = if has_tool_calls {
                    Some(unified::UnifiedFinishReason::ToolCalls)
                } else {
                    candidate.finish_reason.map(unified::UnifiedFinishReason::from)
                };
                (message, finish_reason)
            }
            None => (
                unified::UnifiedMessage {
                    role: unified::UnifiedRole::Assistant,
                    content: unified::UnifiedContentContainer::Text(String::new()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                None,
            ),
        };

        let stop_reason = finish_reason.clone().map(stop_reason_from_finish_reason);

        Self {
            id: String::new(),
            model: resp.model_version.unwrap_or_default(),
            choices: vec![unified::UnifiedChoice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: resp.usage_metadata.map(unified::UnifiedUsage::from).unwrap_or(unified::UnifiedUsage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
                cache_read_input_tokens: None,
            }),
            created: 0,
            stop_reason,
            stop_sequence: None,
        }
    }
}

/// Anthropic-shaped `stop_reason` derived from Gemini's `finishReason`.
/// `ToolCalls` is already the finish reason whenever the candidate's content
/// carried a function call (see above), so this mapping alone covers the
/// tool-use case too.
fn stop_reason_from_finish_reason(reason: unified::UnifiedFinishReason) -> unified::UnifiedStopReason {
    match reason {
        unified::UnifiedFinishReason::Length => unified::UnifiedStopReason::MaxTokens,
        unified::UnifiedFinishReason::ToolCalls => unified::UnifiedStopReason::ToolUse,
        unified::UnifiedFinishReason::Stop | unified::UnifiedFinishReason::ContentFilter => unified::UnifiedStopReason::EndTurn,
    }
}

impl From<google::GenerateContentChunk> for unified::UnifiedChunk {
    fn from(chunk: google::GenerateContentChunk) -> Self {
        let candidate = chunk.candidates.into_iter().next();

        let delta = match candidate {
            Some(ref candidate) => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();

                for (index, part) in candidate.content.parts.iter().enumerate() {
                    match part {
                        google::Part::Text { text: part_text } => text.push_str(part_text),
                        google::Part::FunctionCall { function_call } => {
                            tool_calls.push(unified::UnifiedStreamingToolCall::Start {
                                index,
                                id: synthetic_tool_call_id(&function_call.name, index),
                                function: unified::UnifiedFunctionStart {
                                    name: function_call.name.clone(),
                                    arguments: function_call.args.to_string(),
                                },
                            });
                        }
                        google::Part::InlineData { .. } | google::Part::FunctionResponse { .. } => {}
                    }
                }

                unified::UnifiedMessageDelta {
                    role: Some(unified::UnifiedRole::Assistant),
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    thinking: None,
                    signature: None,
                }
            }
            None => unified::UnifiedMessageDelta {
                role: None,
                content: None,
                tool_calls: None,
                thinking: None,
                signature: None,
            },
        };

        let finish_reason = candidate.and_then(|c| c.finish_reason).map(unified::UnifiedFinishReason::from);

        Self {
            id: Cow::Borrowed(""),
            model: Cow::Owned(chunk.model_version.unwrap_or_default()),
            choices: vec![unified::UnifiedChoiceDelta {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: chunk.usage_metadata.map(unified::UnifiedUsage::from),
            created: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_id_roundtrips_through_name_extraction() {
        let id = synthetic_tool_call_id("get_weather", 2);
        assert_eq!(tool_call_id_to_name(&id), "get_weather");
    }

    #[test]
    fn function_call_part_becomes_tool_use_block() {
        let content = google::Content {
            role: Some(google::Role::Model),
            parts: vec![google::Part::FunctionCall {
                function_call: google::FunctionCall {
                    name: "get_weather".to_string(),
                    args: serde_json::json!({"location": "Paris"}),
                },
            }],
        };

        let message = unified::UnifiedMessage::from(content);
        assert_eq!(message.role, unified::UnifiedRole::Assistant);
        let tool_calls = message.tool_calls.expect("expected tool calls");
        assert_eq!(tool_calls[0].function.name, "get_weather");
    }

    #[test]
    fn response_with_function_call_reports_tool_calls_finish_reason() {
        let resp = google::GenerateContentResponse {
            candidates: vec![google::Candidate {
                content: google::Content {
                    role: Some(google::Role::Model),
                    parts: vec![google::Part::FunctionCall {
                        function_call: google::FunctionCall {
                            name: "search".to_string(),
                            args: serde_json::json!({}),
                        },
                    }],
                },
                finish_reason: Some(google::FinishReason::Stop),
                index: 0,
            }],
            usage_metadata: None,
            model_version: Some("gemini-1.5-pro".to_string()),
        };

        let unified_resp = unified::UnifiedResponse::from(resp);
        assert_eq!(
            unified_resp.choices[0].finish_reason,
            Some(unified::UnifiedFinishReason::ToolCalls)
        );
        assert_eq!(unified_resp.stop_reason, Some(unified::UnifiedStopReason::ToolUse));
    }

    #[test]
    fn response_with_max_tokens_finish_reason_reports_max_tokens_stop_reason() {
        let resp = google::GenerateContentResponse {
            candidates: vec![google::Candidate {
                content: google::Content {
                    role: Some(google::Role::Model),
                    parts: vec![google::Part::Text { text: "partial".to_string() }],
                },
                finish_reason: Some(google::FinishReason::MaxTokens),
                index: 0,
            }],
            usage_metadata: None,
            model_version: Some("gemini-1.5-pro".to_string()),
        };

        let unified_resp = unified::UnifiedResponse::from(resp);
        assert_eq!(unified_resp.stop_reason, Some(unified::UnifiedStopReason::MaxTokens));
    }
}
