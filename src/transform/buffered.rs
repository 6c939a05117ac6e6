// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

use serde_json::{Map, Value};
use uuid::Uuid;

use super::types::{ChatCompletion, MessageResponse, ResponseBlock, StopReason};
use crate::accumulator::Usage;

/// Convert one complete chat completion into one complete Anthropic message.
///
/// Blocks are ordered thinking, text, tool_use. A response with nothing in
/// it still carries one empty text block.
pub fn transform_response(
    completion: ChatCompletion,
    message_id: impl Into<String>,
    model: impl Into<String>,
) -> MessageResponse {
    let usage = completion.usage.map(Usage::from).unwrap_or_default();
    let choice = completion.choices.into_iter().next().unwrap_or_default();
    let message = choice.message;

    let mut response = MessageResponse::new(message_id, "assistant", model);

    if let Some(thinking) = message.reasoning_content.filter(|t| !t.is_empty()) {
        response.content.push(ResponseBlock::Thinking { thinking });
    }
    if let Some(text) = message.content.filter(|t| !t.is_empty()) {
        response.content.push(ResponseBlock::Text { text });
    }
    for call in message.tool_calls.unwrap_or_default() {
        let id = call
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4().simple()));
        let input = parse_arguments(&call.function.name, call.function.arguments);
        response.content.push(ResponseBlock::ToolUse {
            id,
            name: call.function.name,
            input,
        });
    }
    if response.content.is_empty() {
        response.content.push(ResponseBlock::Text {
            text: String::new(),
        });
    }

    response.stop_reason = Some(
        choice
            .finish_reason
            .as_deref()
            .map(StopReason::from_finish_reason)
            .unwrap_or(StopReason::EndTurn),
    );
    response.usage = usage;
    response
}

/// Tool arguments arrive as a JSON-encoded string (or, from some upstreams,
/// the object itself). Anything unusable becomes `{}`.
fn parse_arguments(tool: &str, arguments: Value) -> Value {
    let parsed = match arguments {
        Value::String(s) if s.trim().is_empty() => return Value::Object(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(tool, error = %e, "tool arguments are not valid JSON; using empty input");
                return Value::Object(Map::new());
            }
        },
        Value::Null => return Value::Object(Map::new()),
        other => other,
    };
    if parsed.is_object() {
        parsed
    } else {
        tracing::warn!(tool, "tool arguments are not a JSON object; using empty input");
        Value::Object(Map::new())
    }
}
