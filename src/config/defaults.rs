// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Built-in tables. Both can be extended or replaced from the config file.

use std::collections::HashMap;

/// Long generations stream for minutes; the timeout covers the whole body.
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;

pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_LOOP_THRESHOLD: usize = 3;

/// Provider-specific model aliases mapped to canonical Anthropic model ids.
pub fn default_model_aliases() -> HashMap<String, String> {
    [
        // Bedrock
        ("anthropic.claude-3-5-sonnet-20241022-v2:0", "claude-3-5-sonnet-20241022"),
        ("anthropic.claude-3-5-haiku-20241022-v1:0", "claude-3-5-haiku-20241022"),
        ("anthropic.claude-3-7-sonnet-20250219-v1:0", "claude-3-7-sonnet-20250219"),
        ("us.anthropic.claude-3-7-sonnet-20250219-v1:0", "claude-3-7-sonnet-20250219"),
        ("anthropic.claude-sonnet-4-20250514-v1:0", "claude-sonnet-4-20250514"),
        ("us.anthropic.claude-sonnet-4-20250514-v1:0", "claude-sonnet-4-20250514"),
        ("anthropic.claude-opus-4-20250514-v1:0", "claude-opus-4-20250514"),
        ("us.anthropic.claude-opus-4-20250514-v1:0", "claude-opus-4-20250514"),
        // Vertex
        ("claude-3-5-sonnet-v2@20241022", "claude-3-5-sonnet-20241022"),
        ("claude-3-5-haiku@20241022", "claude-3-5-haiku-20241022"),
        ("claude-3-7-sonnet@20250219", "claude-3-7-sonnet-20250219"),
        ("claude-sonnet-4@20250514", "claude-sonnet-4-20250514"),
        ("claude-opus-4@20250514", "claude-opus-4-20250514"),
        // Gateway-style prefixes
        ("anthropic/claude-3.5-sonnet", "claude-3-5-sonnet-20241022"),
        ("anthropic/claude-3.7-sonnet", "claude-3-7-sonnet-20250219"),
        ("anthropic/claude-sonnet-4", "claude-sonnet-4-20250514"),
        ("anthropic/claude-opus-4", "claude-opus-4-20250514"),
    ]
    .into_iter()
    .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
    .collect()
}

/// Keys each known tool's input must contain before it is released to the client.
pub fn default_required_params() -> HashMap<String, Vec<String>> {
    [
        ("Read", &["file_path"][..]),
        ("Edit", &["file_path", "old_string", "new_string"][..]),
        ("Write", &["file_path", "content"][..]),
        ("Glob", &["pattern"][..]),
        ("Grep", &["pattern"][..]),
        ("Bash", &["command"][..]),
        ("Task", &["description", "prompt", "subagent_type"][..]),
    ]
    .into_iter()
    .map(|(tool, keys)| {
        (
            tool.to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        )
    })
    .collect()
}
