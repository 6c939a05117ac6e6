// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;

use super::defaults::{
    default_model_aliases, default_required_params, DEFAULT_LOOP_THRESHOLD,
    DEFAULT_MAX_BODY_BYTES, DEFAULT_TIMEOUT_MS,
};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level parsed and validated relay config.
#[derive(Debug, Clone)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub server: ServerConfig,
    /// Internal alias -> canonical model id. Defaults merged with overrides.
    pub model_aliases: HashMap<String, String>,
    /// Tool name -> keys its input must carry. Defaults merged with overrides.
    pub required_params: HashMap<String, Vec<String>>,
    pub loop_guard: LoopGuardConfig,
    /// SHA256 hash of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

impl Config {
    /// A config pointing at `base_url` with every other field defaulted.
    pub fn for_upstream(base_url: impl Into<String>, format: UpstreamFormat) -> Self {
        Self {
            upstream: UpstreamConfig {
                base_url: base_url.into(),
                format,
                timeout_ms: DEFAULT_TIMEOUT_MS,
                auth_token: None,
                insecure_skip_tls_verify: false,
                chat_path: "/v1/chat/completions".to_string(),
                model: None,
            },
            server: ServerConfig::default(),
            model_aliases: default_model_aliases(),
            required_params: default_required_params(),
            loop_guard: LoopGuardConfig::default(),
            config_hash: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Wire protocol spoken by the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFormat {
    /// Anthropic-compatible proxy: only model ids and tool_use blocks need repair.
    Anthropic,
    /// OpenAI-style chat completions: full translation to Anthropic Messages.
    OpenAi,
}

impl fmt::Display for UpstreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFormat::Anthropic => f.write_str("anthropic"),
            UpstreamFormat::OpenAi => f.write_str("openai"),
        }
    }
}

/// Already-resolved connection parameters for the upstream hop.
#[derive(Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub format: UpstreamFormat,
    /// Whole-request timeout, covering the streamed body.
    pub timeout_ms: u64,
    pub auth_token: Option<String>,
    /// Only for self-signed private deployments.
    pub insecure_skip_tls_verify: bool,
    /// Chat-completions path used when `format` is `OpenAi`.
    pub chat_path: String,
    /// Upstream model override when `format` is `OpenAi`.
    pub model: Option<String>,
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("format", &self.format)
            .field("timeout_ms", &self.timeout_ms)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("chat_path", &self.chat_path)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Request bodies above this are rejected before any upstream call.
    pub max_body_bytes: usize,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopGuardConfig {
    /// Consecutive trailing thinking blocks that count as a loop.
    pub threshold: usize,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOOP_THRESHOLD,
        }
    }
}
