// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Request mapping: Anthropic Messages request -> OpenAI chat completion
//
// Only the shapes the Messages API defines are accepted. Thinking blocks in
// history have no OpenAI counterpart and are dropped. Tool results become
// `tool` role messages placed ahead of the user text they arrived with.

use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request body is not a valid Messages request: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<InputMessage>,
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemBlock {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<InputBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<MessageContent>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    Thinking {},
    RedactedThinking {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

impl ImageSource {
    fn to_url(&self) -> String {
        match self {
            ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
            ImageSource::Url { url } => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto {},
    Any {},
    Tool { name: String },
    None {},
}

/// A mapped request plus what the response side needs to know about it.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub body: Value,
    pub stream: bool,
    /// Model the client asked for; echoed back in the translated response.
    pub client_model: String,
}

/// Parse a Messages request body and map it to a chat-completion request.
/// `model_override` replaces the model sent upstream.
pub fn to_chat_request(body: &[u8], model_override: Option<&str>) -> Result<ChatRequest, RequestError> {
    let req: MessagesRequest = serde_json::from_slice(body)?;

    let mut messages = Vec::new();
    if let Some(system) = req.system.as_ref().map(system_text).filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    for message in &req.messages {
        map_message(message, &mut messages);
    }

    let mut out = Map::new();
    out.insert(
        "model".into(),
        Value::String(model_override.unwrap_or(&req.model).to_string()),
    );
    out.insert("messages".into(), Value::Array(messages));
    if let Some(max_tokens) = req.max_tokens {
        out.insert("max_tokens".into(), json!(max_tokens));
    }
    if let Some(t) = req.temperature {
        out.insert("temperature".into(), json!(t));
    }
    if let Some(p) = req.top_p {
        out.insert("top_p".into(), json!(p));
    }
    if let Some(stop) = req.stop_sequences.as_ref().filter(|s| !s.is_empty()) {
        out.insert("stop".into(), json!(stop));
    }
    if !req.tools.is_empty() {
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                let mut function = json!({"name": t.name, "parameters": schema_or_empty(&t.input_schema)});
                if let Some(desc) = &t.description {
                    function["description"] = json!(desc);
                }
                json!({"type": "function", "function": function})
            })
            .collect();
        out.insert("tools".into(), Value::Array(tools));
    }
    if let Some(choice) = &req.tool_choice {
        let mapped = match choice {
            ToolChoice::Auto {} => json!("auto"),
            ToolChoice::Any {} => json!("required"),
            ToolChoice::None {} => json!("none"),
            ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
        };
        out.insert("tool_choice".into(), mapped);
    }
    if req.stream {
        out.insert("stream".into(), Value::Bool(true));
        out.insert("stream_options".into(), json!({"include_usage": true}));
    }

    Ok(ChatRequest {
        body: Value::Object(out),
        stream: req.stream,
        client_model: req.model,
    })
}

fn system_text(system: &SystemPrompt) -> String {
    match system {
        SystemPrompt::Text(text) => text.clone(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .map(|b| b.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

fn schema_or_empty(schema: &Value) -> Value {
    if schema.is_object() {
        schema.clone()
    } else {
        json!({"type": "object", "properties": {}})
    }
}

fn map_message(message: &InputMessage, out: &mut Vec<Value>) {
    let blocks = match &message.content {
        MessageContent::Text(text) => {
            out.push(json!({"role": message.role, "content": text}));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    if message.role == "assistant" {
        map_assistant(blocks, out);
        return;
    }

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            InputBlock::Text { text } => parts.push(json!({"type": "text", "text": text})),
            InputBlock::Image { source } => {
                parts.push(json!({"type": "image_url", "image_url": {"url": source.to_url()}}))
            }
            InputBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut text = content.as_ref().map(content_text).unwrap_or_default();
                if is_error.unwrap_or(false) {
                    text = format!("Error: {text}");
                }
                out.push(json!({"role": "tool", "tool_call_id": tool_use_id, "content": text}));
            }
            InputBlock::ToolUse { .. }
            | InputBlock::Thinking {}
            | InputBlock::RedactedThinking {}
            | InputBlock::Other => {}
        }
    }

    if parts.is_empty() {
        return;
    }
    let all_text = parts.iter().all(|p| p["type"] == "text");
    let content = if all_text {
        let joined: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
        Value::String(joined.join("\n"))
    } else {
        Value::Array(parts)
    };
    out.push(json!({"role": message.role, "content": content}));
}

fn map_assistant(blocks: &[InputBlock], out: &mut Vec<Value>) {
    let mut text = Vec::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            InputBlock::Text { text: t } => text.push(t.as_str()),
            InputBlock::ToolUse { id, name, input } => tool_calls.push(json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": input.to_string()},
            })),
            InputBlock::Image { .. }
            | InputBlock::ToolResult { .. }
            | InputBlock::Thinking {}
            | InputBlock::RedactedThinking {}
            | InputBlock::Other => {}
        }
    }
    if text.is_empty() && tool_calls.is_empty() {
        return;
    }

    let mut message = json!({"role": "assistant"});
    message["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text.join("\n"))
    };
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    out.push(message);
}

fn content_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                InputBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
