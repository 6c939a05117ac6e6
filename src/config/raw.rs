// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal).
// Kept apart from the public Config structs: variable interpolation,
// defaulting and validation happen between raw and public.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub toolrelay: String,
    pub upstream: Option<RawUpstreamConfig>,
    pub server: Option<RawServerConfig>,
    pub models: Option<RawModelsConfig>,
    pub tools: Option<RawToolsConfig>,
    pub loop_guard: Option<RawLoopGuardConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawUpstreamConfig {
    pub base_url: Option<String>,
    pub format: Option<String>,
    pub timeout_ms: Option<u64>,
    pub auth_token: Option<String>,
    pub insecure_skip_tls_verify: Option<bool>,
    pub chat_path: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawServerConfig {
    pub max_body_bytes: Option<usize>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RawModelsConfig {
    /// If false, skip the built-in alias table. Default: true.
    pub use_default_aliases: Option<bool>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct RawToolsConfig {
    /// If false, skip the built-in required-parameter table. Default: true.
    pub use_default_required_params: Option<bool>,
    #[serde(default)]
    pub required_params: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RawLoopGuardConfig {
    pub threshold: Option<usize>,
}
