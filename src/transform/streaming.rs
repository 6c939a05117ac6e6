// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Streaming transformer
//
// Drives one `DeltaAccumulator` from upstream events and emits Anthropic
// events. The message is closed only once both the finish reason and usage
// have arrived, in either order; stream end forces closure with whatever is
// known.

use std::collections::HashMap;

use uuid::Uuid;

use super::types::{
    ChatChunk, ContentDelta, MessageDeltaBody, MessageEvent, MessageResponse, ResponseBlock,
    StopReason, UpstreamEvent,
};
use crate::accumulator::{BlockKind, DeltaAccumulator, ToolCallFragment};
use crate::stream::{data_payload, error_event_lines, LineHandler};

pub struct StreamTransformer {
    acc: DeltaAccumulator,
    loop_threshold: usize,
    /// Upstream tool index to the downstream block it renders into.
    tool_blocks: HashMap<usize, usize>,
}

impl StreamTransformer {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>, loop_threshold: usize) -> Self {
        Self {
            acc: DeltaAccumulator::new(message_id, model),
            loop_threshold,
            tool_blocks: HashMap::new(),
        }
    }

    pub fn accumulator(&self) -> &DeltaAccumulator {
        &self.acc
    }

    pub fn handle_chunk(&mut self, chunk: ChatChunk) -> Vec<MessageEvent> {
        UpstreamEvent::from_chunk(chunk)
            .into_iter()
            .flat_map(|event| self.handle(event))
            .collect()
    }

    /// Apply one upstream event, then finalize if both terminal signals are in.
    pub fn handle(&mut self, event: UpstreamEvent) -> Vec<MessageEvent> {
        let mut out = Vec::new();
        if self.acc.is_finalized() {
            tracing::debug!(event = ?event, "ignoring upstream event after finalization");
            return out;
        }

        match event {
            UpstreamEvent::Role(role) => {
                if !self.acc.message_started() {
                    self.acc.set_role(role);
                }
                self.ensure_started(&mut out);
            }
            UpstreamEvent::Reasoning(text) => self.append(BlockKind::Thinking, &text, &mut out),
            UpstreamEvent::Content(text) => self.append(BlockKind::Text, &text, &mut out),
            UpstreamEvent::ToolCall(fragment) => self.tool_call(fragment, &mut out),
            UpstreamEvent::FinishReason(reason) => self.acc.set_finish_reason(reason),
            UpstreamEvent::Usage(usage) => self.acc.update_usage(usage),
            UpstreamEvent::Done => {
                out.extend(self.finish());
                return out;
            }
        }

        if self.acc.is_ready_to_finalize() {
            self.finalize(&mut out);
        }
        out
    }

    /// Stream end. Closes the message if it is still open, degrading missing
    /// usage to zero and a missing finish reason to `end_turn`.
    pub fn finish(&mut self) -> Vec<MessageEvent> {
        let mut out = Vec::new();
        if self.acc.is_finalized() {
            return out;
        }
        if self.acc.finish_reason().is_none() {
            tracing::warn!(message_id = %self.acc.message_id(), "upstream ended without finish_reason; closing as end_turn");
        }
        if !self.acc.usage_received() {
            tracing::warn!(message_id = %self.acc.message_id(), "upstream ended without usage; finalizing with zero usage");
        }
        self.finalize(&mut out);
        out
    }

    fn ensure_started(&mut self, out: &mut Vec<MessageEvent>) {
        if self.acc.mark_message_started() {
            out.push(MessageEvent::MessageStart {
                message: MessageResponse::new(
                    self.acc.message_id(),
                    self.acc.role(),
                    self.acc.model(),
                ),
            });
        }
    }

    /// Append thinking or text, opening a block of that kind if needed.
    fn append(&mut self, kind: BlockKind, text: &str, out: &mut Vec<MessageEvent>) {
        self.ensure_started(out);

        let open = self
            .acc
            .current_block()
            .filter(|block| block.kind == kind)
            .map(|block| block.index);
        let index = match open {
            Some(index) => index,
            None => {
                let index = self.open_block(kind, ResponseBlock::empty(kind), out);
                if kind == BlockKind::Thinking {
                    self.check_loop();
                }
                index
            }
        };

        self.acc.add_delta(text);
        let delta = match kind {
            BlockKind::Thinking => ContentDelta::ThinkingDelta {
                thinking: text.to_string(),
            },
            _ => ContentDelta::TextDelta {
                text: text.to_string(),
            },
        };
        out.push(MessageEvent::ContentBlockDelta { index, delta });
    }

    fn tool_call(&mut self, mut fragment: ToolCallFragment, out: &mut Vec<MessageEvent>) {
        self.ensure_started(out);

        if self.acc.tool_call(fragment.index).is_none() && fragment.id.is_none() {
            fragment.id = Some(format!("toolu_{}", Uuid::new_v4().simple()));
        }

        if self.acc.add_tool_call_delta(&fragment) {
            let (id, name) = self
                .acc
                .tool_call(fragment.index)
                .map(|t| (t.id.clone(), t.name.clone()))
                .unwrap_or_default();
            tracing::debug!(tool_index = fragment.index, tool = %name, tool_id = %id, "opening tool_use block");
            let header = ResponseBlock::ToolUse {
                id,
                name,
                input: serde_json::Value::Object(Default::default()),
            };
            let index = self.open_block(BlockKind::ToolUse, header, out);
            self.tool_blocks.insert(fragment.index, index);
            self.acc.add_delta(&fragment.arguments);
            out.push(MessageEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: fragment.arguments,
                },
            });
            return;
        }

        let Some(&index) = self.tool_blocks.get(&fragment.index) else {
            return;
        };
        let open = self.acc.current_block().map(|b| b.index) == Some(index);
        if !open {
            tracing::warn!(
                tool_index = fragment.index,
                block = index,
                "tool arguments arrived after their block closed; not forwarded"
            );
            return;
        }
        if fragment.arguments.is_empty() {
            return;
        }
        self.acc.add_delta(&fragment.arguments);
        out.push(MessageEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta {
                partial_json: fragment.arguments,
            },
        });
    }

    fn open_block(
        &mut self,
        kind: BlockKind,
        header: ResponseBlock,
        out: &mut Vec<MessageEvent>,
    ) -> usize {
        let start = self.acc.start_block(kind);
        if let Some(closed) = start.closed {
            out.push(MessageEvent::ContentBlockStop { index: closed });
        }
        out.push(MessageEvent::ContentBlockStart {
            index: start.index,
            content_block: header,
        });
        start.index
    }

    fn check_loop(&mut self) {
        let already = self.acc.loop_detected();
        if self.acc.check_for_loop(self.loop_threshold) && !already {
            tracing::warn!(
                message_id = %self.acc.message_id(),
                threshold = self.loop_threshold,
                blocks = self.acc.blocks().len(),
                "consecutive thinking blocks without a tool call; possible reasoning loop"
            );
        }
    }

    fn finalize(&mut self, out: &mut Vec<MessageEvent>) {
        self.ensure_started(out);
        if !self.acc.mark_finalized() {
            return;
        }
        if let Some(index) = self.acc.stop_current_block() {
            out.push(MessageEvent::ContentBlockStop { index });
        }
        let stop_reason = self
            .acc
            .finish_reason()
            .map(StopReason::from_finish_reason)
            .unwrap_or(StopReason::EndTurn);
        out.push(MessageEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: self.acc.usage(),
        });
        out.push(MessageEvent::MessageStop);

        let summary = self.acc.summary();
        tracing::info!(
            message_id = %summary.message_id,
            model = %summary.model,
            blocks = summary.block_count,
            tool_calls = summary.tool_call_count,
            input_tokens = summary.usage.input_tokens,
            output_tokens = summary.usage.output_tokens,
            loop_detected = summary.loop_detected,
            stop_reason = ?stop_reason,
            "message finalized"
        );
    }
}

/// Line handler translating an OpenAI chat-completion stream into Anthropic
/// SSE. Input framing is discarded; output is re-framed per event.
pub struct SseTranslator {
    transformer: StreamTransformer,
    /// Set once an error event has been sent; nothing follows it.
    failed: bool,
}

impl SseTranslator {
    pub fn new(transformer: StreamTransformer) -> Self {
        Self {
            transformer,
            failed: false,
        }
    }

    fn render(events: Vec<MessageEvent>) -> Vec<String> {
        events.iter().flat_map(MessageEvent::to_sse_lines).collect()
    }
}

impl LineHandler for SseTranslator {
    fn handle_line(&mut self, line: &str) -> Vec<String> {
        if self.failed {
            return Vec::new();
        }
        let Some(data) = data_payload(line) else {
            return Vec::new();
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Self::render(self.transformer.handle(UpstreamEvent::Done));
        }

        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, bytes = data.len(), "skipping unparseable upstream chunk");
                return Vec::new();
            }
        };

        if let Some(error) = &chunk.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            tracing::warn!(error = %message, "upstream reported an in-stream error");
            self.failed = true;
            return error_event_lines("api_error", &message).into();
        }

        Self::render(self.transformer.handle_chunk(chunk))
    }

    fn finish(&mut self) -> Vec<String> {
        if self.failed {
            return Vec::new();
        }
        Self::render(self.transformer.finish())
    }
}
