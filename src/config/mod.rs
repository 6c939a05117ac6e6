// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Config loading: YAML source -> raw types -> validated `Config`.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use defaults::{
    default_model_aliases, default_required_params, DEFAULT_LOOP_THRESHOLD,
    DEFAULT_MAX_BODY_BYTES, DEFAULT_TIMEOUT_MS,
};
pub use error::ConfigError;
pub use loader::{compute_hash, load_config};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::{Config, LoopGuardConfig, ServerConfig, UpstreamConfig, UpstreamFormat};
