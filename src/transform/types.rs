// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Transform types
//
// Upstream side: OpenAI chat-completion chunks and responses, decomposed into
// the `UpstreamEvent` vocabulary. Downstream side: Anthropic Messages events
// and the complete message object.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::accumulator::{BlockKind, ToolCallFragment, Usage};
use crate::stream::sse_lines;

// ---------------------------------------------------------------------------
// Upstream: OpenAI chat completions
// ---------------------------------------------------------------------------

/// One streamed `chat.completion.chunk`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
    /// Some upstreams report failures in-band as a data line.
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallChunk {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionChunk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }
    }
}

/// A complete, non-streamed `chat.completion`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: CompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: CompletionFunction,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionFunction {
    #[serde(default)]
    pub name: String,
    /// Normally a JSON-encoded string; some upstreams send the object itself.
    #[serde(default)]
    pub arguments: Value,
}

// ---------------------------------------------------------------------------
// Upstream event vocabulary
// ---------------------------------------------------------------------------

/// One semantic step of an upstream stream. A chunk may carry several.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Role(String),
    Reasoning(String),
    Content(String),
    ToolCall(ToolCallFragment),
    FinishReason(String),
    Usage(Usage),
    /// Terminal `[DONE]` or end of the byte stream.
    Done,
}

impl UpstreamEvent {
    /// Decompose a chunk in field order: role, reasoning, content, tool
    /// calls, finish reason, usage. Empty strings count as absent.
    pub fn from_chunk(chunk: ChatChunk) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            let delta = choice.delta;
            if let Some(role) = delta.role.filter(|r| !r.is_empty()) {
                events.push(UpstreamEvent::Role(role));
            }
            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                events.push(UpstreamEvent::Reasoning(text));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(UpstreamEvent::Content(text));
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                events.push(UpstreamEvent::ToolCall(ToolCallFragment {
                    index: call.index,
                    id: call.id.filter(|s| !s.is_empty()),
                    name: function.name.filter(|s| !s.is_empty()),
                    arguments: function.arguments.unwrap_or_default(),
                }));
            }
            if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
                events.push(UpstreamEvent::FinishReason(reason));
            }
        }
        if let Some(usage) = chunk.usage {
            events.push(UpstreamEvent::Usage(usage.into()));
        }
        events
    }
}

// ---------------------------------------------------------------------------
// Downstream: Anthropic Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Refusal,
}

impl StopReason {
    /// Map an OpenAI `finish_reason`. Unknown values end the turn normally.
    pub fn from_finish_reason(reason: &str) -> Self {
        match reason {
            "tool_calls" | "function_call" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            "content_filter" => StopReason::Refusal,
            _ => StopReason::EndTurn,
        }
    }
}

/// One block of a downstream message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Thinking {
        thinking: String,
    },
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

impl ResponseBlock {
    /// The empty header used in `content_block_start`.
    pub fn empty(kind: BlockKind) -> Self {
        match kind {
            BlockKind::Thinking => ResponseBlock::Thinking {
                thinking: String::new(),
            },
            BlockKind::Text => ResponseBlock::Text {
                text: String::new(),
            },
            BlockKind::ToolUse => ResponseBlock::ToolUse {
                id: String::new(),
                name: String::new(),
                input: Value::Object(Default::default()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    ThinkingDelta { thinking: String },
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

/// The complete Anthropic `message` object; also the `message_start` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub model: String,
    pub content: Vec<ResponseBlock>,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

impl MessageResponse {
    pub fn new(id: impl Into<String>, role: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "message".to_string(),
            role: role.into(),
            model: model.into(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
}

/// Downstream stream events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    MessageStart {
        message: MessageResponse,
    },
    ContentBlockStart {
        index: usize,
        content_block: ResponseBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Usage,
    },
    MessageStop,
}

impl MessageEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            MessageEvent::MessageStart { .. } => "message_start",
            MessageEvent::ContentBlockStart { .. } => "content_block_start",
            MessageEvent::ContentBlockDelta { .. } => "content_block_delta",
            MessageEvent::ContentBlockStop { .. } => "content_block_stop",
            MessageEvent::MessageDelta { .. } => "message_delta",
            MessageEvent::MessageStop => "message_stop",
        }
    }

    /// Render as `event:` / `data:` / blank SSE lines.
    pub fn to_sse_lines(&self) -> Vec<String> {
        match serde_json::to_value(self) {
            Ok(data) => sse_lines(self.event_name(), &data).into(),
            Err(e) => {
                tracing::error!(event = self.event_name(), error = %e, "failed to serialize downstream event");
                Vec::new()
            }
        }
    }
}
