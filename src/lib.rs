// Copyright 2026 The Toolrelay Project
// SPDX-License-Identifier: Apache-2.0

pub mod accumulator;
pub mod config;
pub mod engine;
pub mod model_id;
pub mod proxy;
pub mod rewrite;
pub mod stream;
pub mod transform;
