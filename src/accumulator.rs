// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Delta accumulator
//
// Per-message state machine that rebuilds content blocks from upstream
// fragments. Owns:
// - Sequential block indices (from 0, never reused)
// - The single open block, if any
// - Tool call argument buffers keyed by upstream tool index
// - Usage, finish reason and the exactly-once finalization flag
// - The sticky loop-guard flag

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Kind of a content block within an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Thinking,
    Text,
    ToolUse,
}

/// One typed unit of an assistant message, built from fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub kind: BlockKind,
    pub index: usize,
    pub content: String,
    pub started: bool,
    pub stopped: bool,
}

/// Arguments for one upstream tool call, accumulated across fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallState {
    pub id: String,
    pub name: String,
    /// Append-only until the owning block stops.
    pub arguments: String,
}

/// One incremental tool-call fragment as delivered by the upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// Token counts. Set, never summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Descriptor returned by [`DeltaAccumulator::start_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStart {
    pub index: usize,
    pub kind: BlockKind,
    /// Index of the block that had to be closed to open this one.
    pub closed: Option<usize>,
}

/// Read-only projection for logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccumulatorSummary {
    pub message_id: String,
    pub model: String,
    pub role: String,
    pub block_count: usize,
    pub usage: Usage,
    pub tool_call_count: usize,
    pub loop_detected: bool,
}

// ---------------------------------------------------------------------------
// DeltaAccumulator
// ---------------------------------------------------------------------------

/// Mutable state for one in-flight message. Single writer; never reused.
#[derive(Debug, Clone)]
pub struct DeltaAccumulator {
    message_id: String,
    role: String,
    model: String,
    blocks: Vec<ContentBlock>,
    current: Option<usize>,
    thinking: String,
    text: String,
    tool_calls: HashMap<usize, ToolCallState>,
    usage: Usage,
    finish_reason: Option<String>,
    message_started: bool,
    finalized: bool,
    usage_received: bool,
    loop_detected: bool,
}

impl DeltaAccumulator {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            role: "assistant".to_string(),
            model: model.into(),
            blocks: Vec::new(),
            current: None,
            thinking: String::new(),
            text: String::new(),
            tool_calls: HashMap::new(),
            usage: Usage::default(),
            finish_reason: None,
            message_started: false,
            finalized: false,
            usage_received: false,
            loop_detected: false,
        }
    }

    // -- message metadata ---------------------------------------------------

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn set_role(&mut self, role: impl Into<String>) {
        self.role = role.into();
    }

    /// Returns true only on the first call.
    pub fn mark_message_started(&mut self) -> bool {
        !std::mem::replace(&mut self.message_started, true)
    }

    pub fn message_started(&self) -> bool {
        self.message_started
    }

    // -- blocks -------------------------------------------------------------

    /// Close any open block and open a new one with the next index.
    pub fn start_block(&mut self, kind: BlockKind) -> BlockStart {
        let closed = self.stop_current_block();
        let index = self.blocks.len();
        self.blocks.push(ContentBlock {
            kind,
            index,
            content: String::new(),
            started: true,
            stopped: false,
        });
        self.current = Some(index);
        BlockStart {
            index,
            kind,
            closed,
        }
    }

    /// Append to the open block. No-op when nothing is open.
    ///
    /// TODO: a strict mode that reports deltas arriving with no open block,
    /// which currently hides upstream ordering violations.
    pub fn add_delta(&mut self, text: &str) {
        let Some(idx) = self.current else {
            return;
        };
        let block = &mut self.blocks[idx];
        block.content.push_str(text);
        match block.kind {
            BlockKind::Thinking => self.thinking.push_str(text),
            BlockKind::Text => self.text.push_str(text),
            BlockKind::ToolUse => {}
        }
    }

    /// Mark the open block stopped and return its index.
    pub fn stop_current_block(&mut self) -> Option<usize> {
        let idx = self.current.take()?;
        self.blocks[idx].stopped = true;
        Some(idx)
    }

    pub fn current_block(&self) -> Option<&ContentBlock> {
        self.current.map(|idx| &self.blocks[idx])
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    // -- tool calls ---------------------------------------------------------

    /// Register a tool-call fragment. Returns true if it opened a new tool call.
    ///
    /// Arguments concatenate across every fragment sharing an index,
    /// whether or not later fragments repeat the id/name.
    pub fn add_tool_call_delta(&mut self, fragment: &ToolCallFragment) -> bool {
        let mut created = false;
        let state = self.tool_calls.entry(fragment.index).or_insert_with(|| {
            created = true;
            ToolCallState {
                id: fragment.id.clone().unwrap_or_default(),
                name: fragment.name.clone().unwrap_or_default(),
                arguments: String::new(),
            }
        });
        state.arguments.push_str(&fragment.arguments);
        created
    }

    pub fn tool_call(&self, index: usize) -> Option<&ToolCallState> {
        self.tool_calls.get(&index)
    }

    pub fn tool_call_count(&self) -> usize {
        self.tool_calls.len()
    }

    // -- usage & finish -----------------------------------------------------

    /// Overwrite token counts. Safe to call any number of times.
    pub fn update_usage(&mut self, usage: Usage) {
        self.usage = usage;
        self.usage_received = true;
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn usage_received(&self) -> bool {
        self.usage_received
    }

    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    // -- finalization policy ------------------------------------------------

    /// Both terminal signals present and not yet finalized.
    pub fn is_ready_to_finalize(&self) -> bool {
        self.finish_reason.is_some() && self.usage_received && !self.finalized
    }

    /// Returns false if the message was already finalized.
    pub fn mark_finalized(&mut self) -> bool {
        !std::mem::replace(&mut self.finalized, true)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    // -- loop guard ---------------------------------------------------------

    /// True iff the last `threshold` blocks are all thinking and no tool call
    /// has ever been registered. Sets the sticky `loop_detected` flag.
    pub fn check_for_loop(&mut self, threshold: usize) -> bool {
        if threshold == 0 || self.blocks.len() < threshold || !self.tool_calls.is_empty() {
            return false;
        }
        let looping = self.blocks[self.blocks.len() - threshold..]
            .iter()
            .all(|b| b.kind == BlockKind::Thinking);
        if looping {
            self.loop_detected = true;
        }
        looping
    }

    /// Clear the sticky flag. The next check may re-flag the same pattern.
    pub fn reset_loop_detection(&mut self) {
        self.loop_detected = false;
    }

    pub fn loop_detected(&self) -> bool {
        self.loop_detected
    }

    // -- telemetry ----------------------------------------------------------

    pub fn summary(&self) -> AccumulatorSummary {
        AccumulatorSummary {
            message_id: self.message_id.clone(),
            model: self.model.clone(),
            role: self.role.clone(),
            block_count: self.blocks.len(),
            usage: self.usage,
            tool_call_count: self.tool_calls.len(),
            loop_detected: self.loop_detected,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
