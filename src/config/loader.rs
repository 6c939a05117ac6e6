// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

use super::defaults::{
    default_model_aliases, default_required_params, DEFAULT_LOOP_THRESHOLD,
    DEFAULT_MAX_BODY_BYTES, DEFAULT_TIMEOUT_MS,
};
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a relay config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version and required fields
/// 5. Resolve `${VAR}` interpolation in upstream string fields
/// 6. Merge built-in tables with overrides
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.toolrelay != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.toolrelay
        )));
    }

    let upstream = build_upstream_config(raw.upstream)?;
    let server = build_server_config(raw.server)?;

    let mut model_aliases = match &raw.models {
        Some(m) if m.use_default_aliases == Some(false) => Default::default(),
        _ => default_model_aliases(),
    };
    if let Some(models) = raw.models {
        model_aliases.extend(models.aliases);
    }

    let mut required_params = match &raw.tools {
        Some(t) if t.use_default_required_params == Some(false) => Default::default(),
        _ => default_required_params(),
    };
    if let Some(tools) = raw.tools {
        for (tool, keys) in tools.required_params {
            if tool.is_empty() {
                return Err(ConfigError::Validation(
                    "tools.required_params contains an empty tool name".to_string(),
                ));
            }
            required_params.insert(tool, keys);
        }
    }

    let threshold = raw
        .loop_guard
        .and_then(|g| g.threshold)
        .unwrap_or(DEFAULT_LOOP_THRESHOLD);
    if threshold == 0 {
        return Err(ConfigError::Validation(
            "loop_guard.threshold must be at least 1".to_string(),
        ));
    }

    Ok(Config {
        upstream,
        server,
        model_aliases,
        required_params,
        loop_guard: LoopGuardConfig { threshold },
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_upstream_config(raw: Option<raw::RawUpstreamConfig>) -> Result<UpstreamConfig, ConfigError> {
    let raw = raw.ok_or_else(|| {
        ConfigError::Validation("missing required section \"upstream\"".to_string())
    })?;

    let base_url = match raw.base_url {
        Some(url) => resolve_variables(&url)?,
        None => {
            return Err(ConfigError::Validation(
                "upstream.base_url is required".to_string(),
            ))
        }
    };
    if base_url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream.base_url must not be empty".to_string(),
        ));
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "upstream.base_url \"{base_url}\" must start with http:// or https://"
        )));
    }

    let format = match raw.format.as_deref() {
        Some("anthropic") | None => UpstreamFormat::Anthropic,
        Some("openai") => UpstreamFormat::OpenAi,
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown upstream format \"{other}\", expected \"anthropic\" or \"openai\""
            )));
        }
    };

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "upstream.timeout_ms must be greater than 0".to_string(),
        ));
    }

    let auth_token = raw.auth_token.map(|t| resolve_variables(&t)).transpose()?;

    let chat_path = raw
        .chat_path
        .unwrap_or_else(|| "/v1/chat/completions".to_string());
    if !chat_path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "upstream.chat_path \"{chat_path}\" must start with '/'"
        )));
    }

    Ok(UpstreamConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        format,
        timeout_ms,
        auth_token,
        insecure_skip_tls_verify: raw.insecure_skip_tls_verify.unwrap_or(false),
        chat_path,
        model: raw.model,
    })
}

fn build_server_config(raw: Option<raw::RawServerConfig>) -> Result<ServerConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ServerConfig::default());
    };

    let max_body_bytes = raw.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.max_body_bytes must be greater than 0".to_string(),
        ));
    }

    Ok(ServerConfig {
        max_body_bytes,
        verbose: raw.verbose.unwrap_or(false),
    })
}
