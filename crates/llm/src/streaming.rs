//! Streaming engine: stateful translation between the unified chunk
//! stream and the Anthropic SSE event sequence, in both directions.
//!
//! Two distinct jobs live here:
//!
//! - [`AnthropicStreamTranslator`] reads SSE events from a real Anthropic
//!   upstream and folds them into [`UnifiedChunk`]s, tracking which content
//!   block index is which kind since Anthropic's delta events only carry an
//!   index, not a repeated type tag.
//! - [`AnthropicStreamEmitter`] does the reverse for callers using the
//!   `/v1/messages` endpoint regardless of which upstream actually served
//!   the request: it turns a sequence of `UnifiedChunk`s into a conforming
//!   `message_start → content_block_start → content_block_delta* →
//!   content_block_stop → ... → message_delta → message_stop` sequence,
//!   rather than the naive one event per chunk a direct `From` impl would
//!   produce.

use std::collections::HashMap;

use serde_json::json;

use crate::messages::anthropic::{
    AnthropicContent, AnthropicContentDelta, AnthropicMessageDelta, AnthropicRole, AnthropicStopReason,
    AnthropicStreamEvent, AnthropicStreamMessageStart, AnthropicUsage,
};
use crate::messages::unified::{UnifiedChoiceDelta, UnifiedChunk, UnifiedFinishReason, UnifiedStreamingToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// Folds upstream Anthropic SSE events into unified chunks.
pub(crate) struct AnthropicStreamTranslator {
    model: String,
    block_kinds: HashMap<u32, BlockKind>,
}

impl AnthropicStreamTranslator {
    pub(crate) fn new(model: String) -> Self {
        Self {
            model,
            block_kinds: HashMap::new(),
        }
    }

    /// Fold one upstream event into at most one unified chunk. Events that
    /// carry no content of their own (`message_start`, `content_block_stop`,
    /// `ping`) are absorbed into translator state and yield `None`.
    pub(crate) fn translate(&mut self, event: AnthropicStreamEvent) -> Option<UnifiedChunk> {
        match event {
            AnthropicStreamEvent::MessageStart { .. } | AnthropicStreamEvent::ContentBlockStop { .. } => None,
            AnthropicStreamEvent::Ping => None,
            AnthropicStreamEvent::Error { error } => {
                log::error!("Anthropic stream error event: {} - {}", error.error_type, error.message);
                None
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => {
                let kind = match &content_block {
                    AnthropicContent::Text { .. } => BlockKind::Text,
                    AnthropicContent::Thinking { .. } => BlockKind::Thinking,
                    AnthropicContent::ToolUse { .. } => BlockKind::ToolUse,
                    AnthropicContent::Image { .. } | AnthropicContent::ToolResult { .. } => return None,
                };
                self.block_kinds.insert(index, kind);

                if let AnthropicContent::ToolUse { id, name, .. } = content_block {
                    return Some(self.chunk(delta_with_tool_calls(vec![UnifiedStreamingToolCall::Start {
                        index: index as usize,
                        id,
                        function: crate::messages::unified::UnifiedFunctionStart {
                            name,
                            arguments: String::new(),
                        },
                    }])));
                }

                None
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                let kind = self.block_kinds.get(&index).copied();
                let message_delta = match (kind, delta) {
                    (_, AnthropicContentDelta::TextDelta { text }) => delta_with_content(text),
                    (_, AnthropicContentDelta::ThinkingDelta { thinking }) => delta_with_thinking(thinking),
                    (_, AnthropicContentDelta::SignatureDelta { signature }) => delta_with_signature(signature),
                    (Some(BlockKind::ToolUse) | None, AnthropicContentDelta::InputJsonDelta { partial_json }) => {
                        delta_with_tool_calls(vec![UnifiedStreamingToolCall::Delta {
                            index: index as usize,
                            function: crate::messages::unified::UnifiedFunctionDelta {
                                arguments: partial_json,
                            },
                        }])
                    }
                };
                Some(self.chunk(message_delta))
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let mut chunk = self.chunk(crate::messages::unified::UnifiedMessageDelta {
                    role: None,
                    content: None,
                    tool_calls: None,
                    thinking: None,
                    signature: None,
                });
                chunk.choices[0].finish_reason = delta.stop_reason.map(finish_reason_from_stop_reason);
                chunk.usage = Some(crate::messages::unified::UnifiedUsage {
                    prompt_tokens: usage.input_tokens.max(0) as u32,
                    completion_tokens: usage.output_tokens.max(0) as u32,
                    total_tokens: (usage.input_tokens.max(0) + usage.output_tokens.max(0)) as u32,
                    cache_read_input_tokens: usage.cache_read_input_tokens.map(|v| v.max(0) as u32),
                });
                Some(chunk)
            }
            AnthropicStreamEvent::MessageStop => None,
        }
    }

    fn chunk(&self, delta: crate::messages::unified::UnifiedMessageDelta) -> UnifiedChunk {
        UnifiedChunk {
            id: std::borrow::Cow::Owned(String::new()),
            model: std::borrow::Cow::Owned(self.model.clone()),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
            created: 0,
        }
    }
}

fn delta_with_content(text: String) -> crate::messages::unified::UnifiedMessageDelta {
    crate::messages::unified::UnifiedMessageDelta {
        role: None,
        content: Some(text),
        tool_calls: None,
        thinking: None,
        signature: None,
    }
}

fn delta_with_thinking(thinking: String) -> crate::messages::unified::UnifiedMessageDelta {
    crate::messages::unified::UnifiedMessageDelta {
        role: None,
        content: None,
        tool_calls: None,
        thinking: Some(thinking),
        signature: None,
    }
}

fn delta_with_signature(signature: String) -> crate::messages::unified::UnifiedMessageDelta {
    crate::messages::unified::UnifiedMessageDelta {
        role: None,
        content: None,
        tool_calls: None,
        thinking: None,
        signature: Some(signature),
    }
}

fn delta_with_tool_calls(tool_calls: Vec<UnifiedStreamingToolCall>) -> crate::messages::unified::UnifiedMessageDelta {
    crate::messages::unified::UnifiedMessageDelta {
        role: None,
        content: None,
        tool_calls: Some(tool_calls),
        thinking: None,
        signature: None,
    }
}

fn finish_reason_from_stop_reason(reason: AnthropicStopReason) -> UnifiedFinishReason {
    match reason {
        AnthropicStopReason::EndTurn => UnifiedFinishReason::Stop,
        AnthropicStopReason::MaxTokens => UnifiedFinishReason::Length,
        AnthropicStopReason::StopSequence => UnifiedFinishReason::Stop,
        AnthropicStopReason::ToolUse => UnifiedFinishReason::ToolCalls,
    }
}

fn stop_reason_from_finish_reason(reason: UnifiedFinishReason) -> AnthropicStopReason {
    match reason {
        UnifiedFinishReason::Stop => AnthropicStopReason::EndTurn,
        UnifiedFinishReason::Length => AnthropicStopReason::MaxTokens,
        UnifiedFinishReason::ContentFilter => AnthropicStopReason::EndTurn,
        UnifiedFinishReason::ToolCalls => AnthropicStopReason::ToolUse,
    }
}

/// Emits a conforming Anthropic SSE event sequence from unified chunks,
/// regardless of which upstream dialect actually produced them.
pub(crate) struct AnthropicStreamEmitter {
    message_id: String,
    started: bool,
    current_block: Option<(u32, BlockKind)>,
    next_index: u32,
    tool_call_blocks: HashMap<usize, u32>,
}

impl AnthropicStreamEmitter {
    pub(crate) fn new(message_id: String) -> Self {
        Self {
            message_id,
            started: false,
            current_block: None,
            next_index: 0,
            tool_call_blocks: HashMap::new(),
        }
    }

    /// Translate one unified chunk into zero or more Anthropic SSE events,
    /// advancing the block-open/closed state machine as needed.
    pub(crate) fn translate(&mut self, chunk: UnifiedChunk) -> Vec<AnthropicStreamEvent> {
        let mut events = Vec::new();

        events.extend(self.ensure_started(&chunk.model));

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };
        let UnifiedChoiceDelta { delta, finish_reason, .. } = choice;

        if let Some(text) = delta.content {
            self.open_block(BlockKind::Text, &mut events, || AnthropicContent::Text { text: String::new() });
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index: self.current_block.unwrap().0,
                delta: AnthropicContentDelta::TextDelta { text },
            });
        }

        if let Some(thinking) = delta.thinking {
            self.open_block(BlockKind::Thinking, &mut events, || AnthropicContent::Thinking {
                thinking: String::new(),
                signature: None,
            });
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index: self.current_block.unwrap().0,
                delta: AnthropicContentDelta::ThinkingDelta { thinking },
            });
        }

        if let Some(signature) = delta.signature
            && let Some((index, BlockKind::Thinking)) = self.current_block
        {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index,
                delta: AnthropicContentDelta::SignatureDelta { signature },
            });
        }

        if let Some(tool_calls) = delta.tool_calls {
            for call in tool_calls {
                match call {
                    UnifiedStreamingToolCall::Start { index, id, function } => {
                        self.close_current_block(&mut events);
                        let block_index = self.next_index;
                        self.next_index += 1;
                        self.current_block = Some((block_index, BlockKind::ToolUse));
                        self.tool_call_blocks.insert(index, block_index);

                        events.push(AnthropicStreamEvent::ContentBlockStart {
                            index: block_index,
                            content_block: AnthropicContent::ToolUse {
                                id,
                                name: function.name,
                                input: json!({}),
                            },
                        });

                        if !function.arguments.is_empty() {
                            events.push(AnthropicStreamEvent::ContentBlockDelta {
                                index: block_index,
                                delta: AnthropicContentDelta::InputJsonDelta {
                                    partial_json: function.arguments,
                                },
                            });
                        }
                    }
                    UnifiedStreamingToolCall::Delta { index, function } => {
                        let block_index = self
                            .tool_call_blocks
                            .get(&index)
                            .copied()
                            .or_else(|| self.current_block.map(|(i, _)| i))
                            .unwrap_or(0);

                        events.push(AnthropicStreamEvent::ContentBlockDelta {
                            index: block_index,
                            delta: AnthropicContentDelta::InputJsonDelta {
                                partial_json: function.arguments,
                            },
                        });
                    }
                }
            }
        }

        if let Some(finish_reason) = finish_reason {
            self.close_current_block(&mut events);
            events.push(AnthropicStreamEvent::MessageDelta {
                delta: AnthropicMessageDelta {
                    stop_reason: Some(stop_reason_from_finish_reason(finish_reason)),
                    stop_sequence: None,
                },
                usage: chunk
                    .usage
                    .map(|usage| AnthropicUsage {
                        input_tokens: usage.prompt_tokens as i32,
                        output_tokens: usage.completion_tokens as i32,
                        cache_creation_input_tokens: None,
                        cache_read_input_tokens: usage.cache_read_input_tokens.map(|v| v as i32),
                    })
                    .unwrap_or(AnthropicUsage {
                        input_tokens: 0,
                        output_tokens: 0,
                        cache_creation_input_tokens: None,
                        cache_read_input_tokens: None,
                    }),
            });
            events.push(AnthropicStreamEvent::MessageStop);
        }

        events
    }

    /// Emits `message_start` if it hasn't gone out yet, otherwise a no-op.
    /// `translate` calls this on every chunk; callers that need to emit an
    /// event ahead of any chunk — an upstream error arriving before the
    /// first one, say — call it directly so `message_start` still precedes
    /// whatever they push next.
    pub(crate) fn ensure_started(&mut self, model: &str) -> Option<AnthropicStreamEvent> {
        if self.started {
            return None;
        }
        self.started = true;
        Some(AnthropicStreamEvent::MessageStart {
            message: AnthropicStreamMessageStart {
                id: self.message_id.clone(),
                message_type: "message".to_string(),
                role: AnthropicRole::Assistant,
                content: vec![],
                model: model.to_string(),
                usage: AnthropicUsage {
                    input_tokens: 0,
                    output_tokens: 0,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        })
    }

    fn open_block(
        &mut self,
        kind: BlockKind,
        events: &mut Vec<AnthropicStreamEvent>,
        empty_block: impl FnOnce() -> AnthropicContent,
    ) {
        if self.current_block.map(|(_, k)| k) == Some(kind) {
            return;
        }
        self.close_current_block(events);
        let index = self.next_index;
        self.next_index += 1;
        self.current_block = Some((index, kind));
        events.push(AnthropicStreamEvent::ContentBlockStart {
            index,
            content_block: empty_block(),
        });
    }

    fn close_current_block(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if let Some((index, _)) = self.current_block.take() {
            events.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::unified::{UnifiedFunctionDelta, UnifiedFunctionStart, UnifiedMessageDelta};

    fn text_chunk(text: &str) -> UnifiedChunk {
        UnifiedChunk {
            id: std::borrow::Cow::Borrowed(""),
            model: std::borrow::Cow::Borrowed("claude-3-opus"),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta: UnifiedMessageDelta {
                    role: None,
                    content: Some(text.to_string()),
                    tool_calls: None,
                    thinking: None,
                    signature: None,
                },
                finish_reason: None,
            }],
            usage: None,
            created: 0,
        }
    }

    #[test]
    fn ensure_started_emits_message_start_once() {
        let mut emitter = AnthropicStreamEmitter::new("msg_1".to_string());
        assert!(matches!(emitter.ensure_started("claude-3-opus"), Some(AnthropicStreamEvent::MessageStart { .. })));
        assert!(emitter.ensure_started("claude-3-opus").is_none());
    }

    #[test]
    fn ensure_started_is_a_no_op_once_translate_has_started_the_message() {
        let mut emitter = AnthropicStreamEmitter::new("msg_1".to_string());
        emitter.translate(text_chunk("Hello"));
        assert!(emitter.ensure_started("claude-3-opus").is_none());
    }

    #[test]
    fn first_chunk_emits_message_start_then_block_start() {
        let mut emitter = AnthropicStreamEmitter::new("msg_1".to_string());
        let events = emitter.translate(text_chunk("Hello"));

        assert!(matches!(events[0], AnthropicStreamEvent::MessageStart { .. }));
        assert!(matches!(events[1], AnthropicStreamEvent::ContentBlockStart { index: 0, .. }));
        assert!(matches!(events[2], AnthropicStreamEvent::ContentBlockDelta { index: 0, .. }));
    }

    #[test]
    fn consecutive_text_chunks_reuse_the_open_block() {
        let mut emitter = AnthropicStreamEmitter::new("msg_1".to_string());
        emitter.translate(text_chunk("Hello"));
        let events = emitter.translate(text_chunk(" world"));

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AnthropicStreamEvent::ContentBlockDelta { index: 0, .. }));
    }

    #[test]
    fn finish_reason_closes_block_and_stops_message() {
        let mut emitter = AnthropicStreamEmitter::new("msg_1".to_string());
        emitter.translate(text_chunk("Hello"));

        let mut finishing = text_chunk("");
        finishing.choices[0].delta.content = None;
        finishing.choices[0].finish_reason = Some(UnifiedFinishReason::Stop);

        let events = emitter.translate(finishing);
        assert!(matches!(events[0], AnthropicStreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], AnthropicStreamEvent::MessageDelta { .. }));
        assert!(matches!(events[2], AnthropicStreamEvent::MessageStop));
    }

    #[test]
    fn tool_call_start_opens_its_own_block_distinct_from_text() {
        let mut emitter = AnthropicStreamEmitter::new("msg_1".to_string());
        emitter.translate(text_chunk("thinking about it"));

        let mut tool_chunk = text_chunk("");
        tool_chunk.choices[0].delta.content = None;
        tool_chunk.choices[0].delta.tool_calls = Some(vec![UnifiedStreamingToolCall::Start {
            index: 0,
            id: "call_1".to_string(),
            function: UnifiedFunctionStart {
                name: "get_weather".to_string(),
                arguments: String::new(),
            },
        }]);

        let events = emitter.translate(tool_chunk);
        assert!(matches!(events[0], AnthropicStreamEvent::ContentBlockStop { index: 0 }));
        assert!(matches!(events[1], AnthropicStreamEvent::ContentBlockStart { index: 1, .. }));
    }

    #[test]
    fn tool_call_delta_appends_to_its_block() {
        let mut emitter = AnthropicStreamEmitter::new("msg_1".to_string());

        let mut start_chunk = text_chunk("");
        start_chunk.choices[0].delta.content = None;
        start_chunk.choices[0].delta.tool_calls = Some(vec![UnifiedStreamingToolCall::Start {
            index: 0,
            id: "call_1".to_string(),
            function: UnifiedFunctionStart {
                name: "get_weather".to_string(),
                arguments: String::new(),
            },
        }]);
        emitter.translate(start_chunk);

        let mut delta_chunk = text_chunk("");
        delta_chunk.choices[0].delta.content = None;
        delta_chunk.choices[0].delta.tool_calls = Some(vec![UnifiedStreamingToolCall::Delta {
            index: 0,
            function: UnifiedFunctionDelta {
                arguments: "{\"location\":".to_string(),
            },
        }]);
        let events = delta_chunk_events(&mut emitter, delta_chunk);

        assert!(matches!(
            events[0],
            AnthropicStreamEvent::ContentBlockDelta { index: 0, delta: AnthropicContentDelta::InputJsonDelta { .. } }
        ));
    }

    fn delta_chunk_events(emitter: &mut AnthropicStreamEmitter, chunk: UnifiedChunk) -> Vec<AnthropicStreamEvent> {
        emitter.translate(chunk)
    }

    #[test]
    fn inbound_translator_recovers_tool_use_start_from_content_block_start() {
        let mut translator = AnthropicStreamTranslator::new("claude-3-opus".to_string());
        let event = AnthropicStreamEvent::ContentBlockStart {
            index: 0,
            content_block: AnthropicContent::ToolUse {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                input: json!({}),
            },
        };

        let chunk = translator.translate(event).expect("expected a chunk");
        let tool_calls = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(matches!(tool_calls[0], UnifiedStreamingToolCall::Start { .. }));
    }

    #[test]
    fn inbound_translator_passes_through_text_delta() {
        let mut translator = AnthropicStreamTranslator::new("claude-3-opus".to_string());
        translator.translate(AnthropicStreamEvent::ContentBlockStart {
            index: 0,
            content_block: AnthropicContent::Text { text: String::new() },
        });

        let event = AnthropicStreamEvent::ContentBlockDelta {
            index: 0,
            delta: AnthropicContentDelta::TextDelta {
                text: "Hello".to_string(),
            },
        };
        let chunk = translator.translate(event).expect("expected a chunk");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn inbound_translator_maps_message_delta_finish_reason() {
        let mut translator = AnthropicStreamTranslator::new("claude-3-opus".to_string());
        let event = AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDelta {
                stop_reason: Some(AnthropicStopReason::ToolUse),
                stop_sequence: None,
            },
            usage: AnthropicUsage {
                input_tokens: 10,
                output_tokens: 5,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        };

        let chunk = translator.translate(event).expect("expected a chunk");
        assert_eq!(chunk.choices[0].finish_reason, Some(UnifiedFinishReason::ToolCalls));
        assert_eq!(chunk.usage.unwrap().prompt_tokens, 10);
    }
}
