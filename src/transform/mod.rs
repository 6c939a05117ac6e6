// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Format transformation between OpenAI chat completions and Anthropic
// Messages
//
// - streaming: per-event translation with deferred finalization
// - buffered: one complete response in, one complete message out
// - request: Messages request mapped to a chat-completion request

mod buffered;
mod request;
mod streaming;
mod types;

pub use buffered::transform_response;
pub use request::{to_chat_request, ChatRequest, MessagesRequest, RequestError};
pub use streaming::{SseTranslator, StreamTransformer};
pub use types::{
    ChatChunk, ChatCompletion, ContentDelta, MessageDeltaBody, MessageEvent, MessageResponse,
    OpenAiUsage, ResponseBlock, StopReason, UpstreamEvent,
};
