// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// SSE streaming: line framing, the stream worker, and tool-use repair
//
// Responsibilities:
// - Frame upstream bytes into complete SSE lines
// - Drive a per-connection `LineHandler` on its own task
// - Withhold tool_use blocks until their input parses and validates
// - Normalize model ids on message_start
// - Bounded: 4MB max per tool input buffer

mod processor;
mod repair;
mod sse;
mod types;
mod validate;

pub use processor::StreamProcessor;
pub use repair::ToolUseRepairer;
pub use sse::{data_payload, error_event_lines, event_name, sse_lines, LineFramer, LineHandler};
pub use types::{
    BlockDelta, BlockHeader, StreamError, StreamEvent, ToolCallValidator, ToolUseBuffer,
    ValidationResult, MAX_TOOL_INPUT_BYTES,
};
pub use validate::RequiredParamsValidator;

#[cfg(test)]
mod tests;
