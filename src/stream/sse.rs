// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// SSE line framing
//
// Upstream bytes arrive in arbitrary chunks. `LineFramer` carries the
// trailing partial line between reads so handlers only ever see complete
// lines. The carry is byte-level, so a UTF-8 sequence split across two
// reads is reassembled before decoding.

use bytes::BytesMut;

use super::types::MAX_TOOL_INPUT_BYTES;

/// Longest partial line carried between reads. One `data:` line holds at
/// most one tool input fragment plus its event envelope.
pub const MAX_LINE_BYTES: usize = MAX_TOOL_INPUT_BYTES;

/// Pure per-line transformation: one complete input line in, zero or more
/// output lines out. Output lines carry no trailing newline.
///
/// Implementations own all per-connection state; one instance per stream.
pub trait LineHandler: Send {
    fn handle_line(&mut self, line: &str) -> Vec<String>;

    /// Called once when the upstream stream ends.
    fn finish(&mut self) -> Vec<String> {
        Vec::new()
    }
}

/// Splits a byte stream into lines, carrying partial lines across reads.
///
/// A partial line that grows past the limit without a newline is flushed
/// as-is so the carry stays bounded.
#[derive(Debug)]
pub struct LineFramer {
    carry: BytesMut,
    /// Prefix of `carry` already known to hold no newline.
    scanned: usize,
    limit: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            carry: BytesMut::new(),
            scanned: 0,
            limit: limit.max(1),
        }
    }

    /// Append a chunk and drain every complete line. `\r\n` endings are
    /// normalized to `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(offset) = self.carry[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let raw = self.carry.split_to(pos + 1);
            self.scanned = 0;
            let mut line = &raw[..pos];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
        }
        self.scanned = self.carry.len();

        if self.carry.len() > self.limit {
            tracing::warn!(
                bytes = self.carry.len(),
                limit = self.limit,
                "SSE line exceeds limit; flushing partial line"
            );
            let raw = self.carry.split();
            self.scanned = 0;
            lines.push(String::from_utf8_lossy(&raw).into_owned());
        }
        lines
    }

    /// Remaining partial line at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = self.carry.split();
        self.scanned = 0;
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim_end_matches('\r');
        Some(text.to_string())
    }

    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }
}

/// Payload of a `data:` line, if this is one.
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
}

/// Event name of an `event:` line, if this is one.
pub fn event_name(line: &str) -> Option<&str> {
    line.strip_prefix("event:").map(str::trim)
}

/// Render one event as SSE lines: `event:`, `data:`, blank separator.
pub fn sse_lines(event: &str, data: &serde_json::Value) -> [String; 3] {
    [
        format!("event: {event}"),
        format!("data: {data}"),
        String::new(),
    ]
}

/// Structured error event sent when the stream cannot continue.
pub fn error_event_lines(error_type: &str, message: &str) -> [String; 3] {
    sse_lines(
        "error",
        &serde_json::json!({
            "type": "error",
            "error": { "type": error_type, "message": message },
        }),
    )
}
