// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

// Model id normalization: provider-internal aliases -> canonical ids.

use std::collections::HashMap;

use crate::config::default_model_aliases;

/// Maps provider-internal model aliases to canonical model ids.
///
/// Total over all inputs: ids absent from the table come back unchanged,
/// so callers may run every model-bearing field through it unconditionally.
#[derive(Debug, Clone)]
pub struct ModelNormalizer {
    aliases: HashMap<String, String>,
}

impl ModelNormalizer {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn normalize<'a>(&'a self, model: &'a str) -> &'a str {
        self.aliases.get(model).map(String::as_str).unwrap_or(model)
    }

    /// Normalize the string at `value[key]` in place. Returns true if it changed.
    pub fn normalize_field(&self, value: &mut serde_json::Value, key: &str) -> bool {
        let Some(slot) = value.get_mut(key) else {
            return false;
        };
        let canonical = match slot.as_str() {
            Some(current) if self.normalize(current) != current => {
                self.normalize(current).to_string()
            }
            _ => return false,
        };
        *slot = serde_json::Value::String(canonical);
        true
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl Default for ModelNormalizer {
    fn default() -> Self {
        Self::new(default_model_aliases())
    }
}
