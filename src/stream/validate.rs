// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::types::{ToolCallValidator, ValidationResult};
use crate::config::default_required_params;

/// Rejects tool calls that lack keys their tool is known to require.
///
/// The table is plain data: tools absent from it only need a non-empty
/// object, which the buffer enforces before validation.
#[derive(Debug, Clone)]
pub struct RequiredParamsValidator {
    required: HashMap<String, Vec<String>>,
}

impl RequiredParamsValidator {
    pub fn new(required: HashMap<String, Vec<String>>) -> Self {
        Self { required }
    }

    pub fn required_for(&self, tool_name: &str) -> Option<&[String]> {
        self.required.get(tool_name).map(Vec::as_slice)
    }
}

impl Default for RequiredParamsValidator {
    fn default() -> Self {
        Self::new(default_required_params())
    }
}

impl ToolCallValidator for RequiredParamsValidator {
    fn validate(&self, tool_name: &str, input: &Map<String, Value>) -> ValidationResult {
        let Some(required) = self.required_for(tool_name) else {
            return ValidationResult::Allow;
        };
        let missing: Vec<&str> = required
            .iter()
            .filter(|key| !input.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            ValidationResult::Allow
        } else {
            ValidationResult::Block(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            ))
        }
    }
}
