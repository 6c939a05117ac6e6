// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Tool-use repair for Anthropic-compatible streams
//
// Responsibilities:
// - Rewrite `message_start.message.model` through the model normalizer
// - Withhold tool_use blocks from start to stop, accumulating input fragments
// - On stop: release one corrected start (parsed `input`) plus the stop, or
//   replace the whole block with a text block describing the failure
// - Pass every other line through byte-for-byte

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use super::sse::{data_payload, LineHandler};
use super::types::{
    BlockDelta, BlockHeader, StreamError, StreamEvent, ToolCallValidator, ToolUseBuffer,
    ValidationResult,
};
use crate::model_id::ModelNormalizer;

/// Per-connection line handler for Anthropic-compatible upstream streams.
pub struct ToolUseRepairer {
    normalizer: Arc<ModelNormalizer>,
    validator: Arc<dyn ToolCallValidator>,
    /// Open tool_use blocks keyed by content block index.
    buffers: HashMap<usize, ToolUseBuffer>,
    /// `event:` line held until its `data:` line shows whether to withhold it.
    pending_event_line: Option<String>,
    /// The blank separator after a withheld event is withheld too.
    swallow_separator: bool,
    released: usize,
    rejected: usize,
}

impl ToolUseRepairer {
    pub fn new(normalizer: Arc<ModelNormalizer>, validator: Arc<dyn ToolCallValidator>) -> Self {
        Self {
            normalizer,
            validator,
            buffers: HashMap::new(),
            pending_event_line: None,
            swallow_separator: false,
            released: 0,
            rejected: 0,
        }
    }

    /// Tool calls released to the client so far.
    pub fn released(&self) -> usize {
        self.released
    }

    /// Tool calls replaced by an error text block so far.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn open_buffers(&self) -> usize {
        self.buffers.len()
    }

    fn handle_data(&mut self, data: &str, line: &str, event_line: Option<String>) -> Vec<String> {
        let Ok(mut value) = serde_json::from_str::<Value>(data.trim()) else {
            return passthrough(event_line, line);
        };
        let Ok(event) = StreamEvent::deserialize(&value) else {
            return passthrough(event_line, line);
        };

        match event {
            StreamEvent::MessageStart { .. } => {
                let changed = value
                    .get_mut("message")
                    .map(|m| self.normalizer.normalize_field(m, "model"))
                    .unwrap_or(false);
                if changed {
                    tracing::debug!(model = %value["message"]["model"], "normalized model id");
                    passthrough(event_line, &format!("data: {value}"))
                } else {
                    passthrough(event_line, line)
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block: BlockHeader::ToolUse { id, name },
            } => {
                if let Some(previous) = self.buffers.remove(&index) {
                    tracing::warn!(
                        index,
                        tool = %previous.name,
                        "tool_use block restarted before stop; dropping earlier buffer"
                    );
                }
                tracing::debug!(index, tool = %name, tool_id = %id, "buffering tool_use block");
                self.buffers
                    .insert(index, ToolUseBuffer::new(id, name, value, event_line));
                self.swallow_separator = true;
                Vec::new()
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(buffer) = self.buffers.get_mut(&index) else {
                    return passthrough(event_line, line);
                };
                match delta {
                    BlockDelta::InputJsonDelta { partial_json } => buffer.append(&partial_json),
                    other => {
                        tracing::debug!(index, delta = ?other, "ignoring non-input delta inside tool_use block");
                    }
                }
                self.swallow_separator = true;
                Vec::new()
            }
            StreamEvent::ContentBlockStop { index } => match self.buffers.remove(&index) {
                Some(buffer) => self.resolve(index, buffer, line, event_line),
                None => passthrough(event_line, line),
            },
            StreamEvent::ContentBlockStart { .. }
            | StreamEvent::MessageDelta {}
            | StreamEvent::MessageStop {}
            | StreamEvent::Ping {}
            | StreamEvent::Error {}
            | StreamEvent::Unknown => passthrough(event_line, line),
        }
    }

    /// Release or replace a completed tool_use block.
    fn resolve(
        &mut self,
        index: usize,
        buffer: ToolUseBuffer,
        stop_line: &str,
        stop_event_line: Option<String>,
    ) -> Vec<String> {
        let outcome = buffer.parse_input().and_then(|input| {
            match self.validator.validate(&buffer.name, &input) {
                ValidationResult::Allow => Ok(input),
                ValidationResult::Block(reason) => Err(StreamError::Rejected(reason)),
            }
        });

        let mut out = Vec::with_capacity(5);
        match outcome {
            Ok(input) => {
                self.released += 1;
                tracing::debug!(index, tool = %buffer.name, tool_id = %buffer.id, "releasing validated tool_use");
                let mut start = buffer.start;
                start["content_block"]["input"] = Value::Object(input);
                out.extend(buffer.start_event_line);
                out.push(format!("data: {start}"));
            }
            Err(err) => {
                self.rejected += 1;
                tracing::warn!(
                    index,
                    tool = %buffer.name,
                    tool_id = %buffer.id,
                    input_bytes = buffer.arguments.len(),
                    error = %err,
                    "replacing invalid tool_use with text block"
                );
                let text = format!(
                    "[tool call dropped] The {} tool call could not be used: {err}.",
                    display_name(&buffer.name)
                );
                let start = json!({
                    "type": "content_block_start",
                    "index": index,
                    "content_block": { "type": "text", "text": text },
                });
                if buffer.start_event_line.is_some() {
                    out.push("event: content_block_start".to_string());
                }
                out.push(format!("data: {start}"));
            }
        }
        out.push(String::new());
        out.extend(stop_event_line);
        out.push(stop_line.to_string());
        out
    }
}

impl LineHandler for ToolUseRepairer {
    fn handle_line(&mut self, line: &str) -> Vec<String> {
        if line.is_empty() && self.pending_event_line.is_none() {
            if std::mem::take(&mut self.swallow_separator) {
                return Vec::new();
            }
            return vec![String::new()];
        }
        self.swallow_separator = false;

        if line.starts_with("event:") {
            // Two event lines in a row: the first had no data, release it.
            let out = self.pending_event_line.take().into_iter().collect();
            self.pending_event_line = Some(line.to_string());
            return out;
        }

        match data_payload(line) {
            Some(data) => {
                let event_line = self.pending_event_line.take();
                self.handle_data(data, line, event_line)
            }
            None => passthrough(self.pending_event_line.take(), line),
        }
    }

    fn finish(&mut self) -> Vec<String> {
        for (index, buffer) in self.buffers.drain() {
            tracing::warn!(
                index,
                tool = %buffer.name,
                tool_id = %buffer.id,
                "stream ended inside tool_use block; dropping it"
            );
        }
        self.pending_event_line.take().into_iter().collect()
    }
}

fn passthrough(event_line: Option<String>, line: &str) -> Vec<String> {
    let mut out: Vec<String> = event_line.into_iter().collect();
    out.push(line.to_string());
    out
}

fn display_name(name: &str) -> String {
    if name.is_empty() {
        "unnamed".to_string()
    } else {
        format!("\"{name}\"")
    }
}
