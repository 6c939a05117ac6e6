// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Body rewrites for the Anthropic-compatible path
//
// Both functions return `None` when the body should be forwarded untouched:
// it is not JSON, or nothing needed changing. Callers then send the original
// bytes, so a rewrite can never lose data.

use bytes::Bytes;
use serde_json::Value;

use crate::model_id::ModelNormalizer;

/// Remove `cache_control` from every `thinking` block, wherever it sits.
/// The upstream rejects the field on thinking blocks.
pub fn adapt_request_body(body: &[u8]) -> Option<Bytes> {
    let mut value: Value = serde_json::from_slice(body).ok()?;
    let stripped = strip_thinking_cache_control(&mut value);
    if stripped == 0 {
        return None;
    }
    tracing::debug!(stripped, "removed cache_control from thinking blocks");
    serde_json::to_vec(&value).ok().map(Bytes::from)
}

fn strip_thinking_cache_control(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let mut count = 0;
            if map.get("type").and_then(Value::as_str) == Some("thinking")
                && map.remove("cache_control").is_some()
            {
                count += 1;
            }
            for child in map.values_mut() {
                count += strip_thinking_cache_control(child);
            }
            count
        }
        Value::Array(items) => items.iter_mut().map(strip_thinking_cache_control).sum(),
        _ => 0,
    }
}

/// Rewrite the top-level `model` of a complete JSON response.
pub fn normalize_buffered_response(body: &[u8], normalizer: &ModelNormalizer) -> Option<Bytes> {
    let mut value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, bytes = body.len(), "response body is not JSON; passing through");
            return None;
        }
    };
    if !normalizer.normalize_field(&mut value, "model") {
        return None;
    }
    tracing::debug!(model = %value["model"], "normalized model id in response");
    serde_json::to_vec(&value).ok().map(Bytes::from)
}
