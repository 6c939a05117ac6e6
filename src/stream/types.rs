// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Anthropic-compatible upstream event vocabulary, the per-block tool_use
// buffer, validation results and errors.

use serde::Deserialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Upstream event vocabulary
// ---------------------------------------------------------------------------

/// One `data:` payload from an Anthropic-compatible stream.
///
/// Only the fields the repairer acts on are typed; the raw JSON is kept
/// alongside by the caller for re-emission.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        #[serde(default)]
        message: Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: BlockHeader,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {},
    MessageStop {},
    Ping {},
    Error {},
    #[serde(other)]
    Unknown,
}

/// The `content_block` of a `content_block_start` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockHeader {
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
    },
    Text {},
    Thinking {},
    RedactedThinking {},
    #[serde(other)]
    Other,
}

/// The `delta` of a `content_block_delta` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta {
        #[serde(default)]
        text: String,
    },
    ThinkingDelta {
        #[serde(default)]
        thinking: String,
    },
    InputJsonDelta {
        #[serde(default)]
        partial_json: String,
    },
    SignatureDelta {},
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Result of validating a complete tool call before release.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Tool call is well formed: forward to client.
    Allow,
    /// Tool call must not reach the client; includes reason.
    Block(String),
}

/// Validates a complete, parsed tool input before it is released.
pub trait ToolCallValidator: Send + Sync {
    fn validate(&self, tool_name: &str, input: &Map<String, Value>) -> ValidationResult;
}

// ---------------------------------------------------------------------------
// Tool use buffer
// ---------------------------------------------------------------------------

/// Maximum accumulated input for a single tool call, in bytes.
pub const MAX_TOOL_INPUT_BYTES: usize = 4 * 1024 * 1024;

/// Withheld state for one tool_use block, from its start event to its stop.
#[derive(Debug, Clone)]
pub struct ToolUseBuffer {
    pub id: String,
    pub name: String,
    /// Concatenated `partial_json` fragments.
    pub arguments: String,
    /// The withheld `content_block_start` payload.
    pub start: Value,
    /// The `event:` line that preceded the start payload, if the stream uses them.
    pub start_event_line: Option<String>,
    overflowed: bool,
}

impl ToolUseBuffer {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        start: Value,
        start_event_line: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
            start,
            start_event_line,
            overflowed: false,
        }
    }

    /// Append an argument fragment. Past the size cap further fragments are
    /// dropped and the buffer is marked for rejection.
    pub fn append(&mut self, fragment: &str) {
        if self.overflowed {
            return;
        }
        if self.arguments.len() + fragment.len() > MAX_TOOL_INPUT_BYTES {
            self.overflowed = true;
            return;
        }
        self.arguments.push_str(fragment);
    }

    /// Parse the accumulated arguments. Empty text counts as `{}`.
    ///
    /// Fails on overflow, invalid JSON, a non-object value, or an object with
    /// no keys.
    pub fn parse_input(&self) -> Result<Map<String, Value>, StreamError> {
        if self.overflowed {
            return Err(StreamError::BufferOverflow {
                limit: MAX_TOOL_INPUT_BYTES,
            });
        }
        let value = if self.arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| StreamError::InvalidJson {
                reason: e.to_string(),
            })?
        };
        match value {
            Value::Object(map) if map.is_empty() => Err(StreamError::EmptyInput),
            Value::Object(map) => Ok(map),
            other => Err(StreamError::NotAnObject {
                found: json_kind(&other),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a buffered tool call is withheld from the client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("tool input exceeded {limit} bytes")]
    BufferOverflow { limit: usize },

    #[error("tool input is not valid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("tool input must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("tool input is empty")]
    EmptyInput,

    #[error("{0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn buffer_with(args: &str) -> ToolUseBuffer {
        let mut b = ToolUseBuffer::new("toolu_1", "Read", json!({}), None);
        b.append(args);
        b
    }

    #[test]
    fn empty_arguments_are_an_empty_object_and_rejected() {
        assert_eq!(buffer_with("").parse_input(), Err(StreamError::EmptyInput));
        assert_eq!(buffer_with("  ").parse_input(), Err(StreamError::EmptyInput));
        assert_eq!(buffer_with("{}").parse_input(), Err(StreamError::EmptyInput));
    }

    #[test]
    fn fragments_concatenate() {
        let mut b = buffer_with("{\"file_");
        b.append("path\":\"a.js\"}");
        let input = b.parse_input().unwrap();
        assert_eq!(input["file_path"], "a.js");
    }

    #[test]
    fn truncated_json_is_invalid() {
        let err = buffer_with("{\"file_path\":").parse_input().unwrap_err();
        assert!(matches!(err, StreamError::InvalidJson { .. }));
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(
            buffer_with("[1,2]").parse_input(),
            Err(StreamError::NotAnObject { found: "array" })
        );
    }

    #[test]
    fn overflow_marks_buffer() {
        let mut b = buffer_with("{\"content\":\"");
        b.append(&"x".repeat(MAX_TOOL_INPUT_BYTES));
        b.append("\"}");
        assert!(matches!(
            b.parse_input(),
            Err(StreamError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn event_vocabulary_parses() {
        let start: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_start",
            "index": 2,
            "content_block": {"type": "tool_use", "id": "toolu_9", "name": "Bash", "input": {}}
        }))
        .unwrap();
        assert_eq!(
            start,
            StreamEvent::ContentBlockStart {
                index: 2,
                content_block: BlockHeader::ToolUse {
                    id: "toolu_9".into(),
                    name: "Bash".into()
                }
            }
        );

        let delta: StreamEvent = serde_json::from_value(json!({
            "type": "content_block_delta",
            "index": 2,
            "delta": {"type": "input_json_delta", "partial_json": "{\"co"}
        }))
        .unwrap();
        assert!(matches!(
            delta,
            StreamEvent::ContentBlockDelta { delta: BlockDelta::InputJsonDelta { .. }, .. }
        ));

        let md: StreamEvent = serde_json::from_value(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "tool_use"},
            "usage": {"output_tokens": 3}
        }))
        .unwrap();
        assert_eq!(md, StreamEvent::MessageDelta {});

        let unknown: StreamEvent =
            serde_json::from_value(json!({"type": "vendor_heartbeat", "n": 1})).unwrap();
        assert_eq!(unknown, StreamEvent::Unknown);
    }
}
