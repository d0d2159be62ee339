// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::load;
pub use schema::{
    AgentConfig, CircuitBreakerConfig, Config, EngineConfig, ModelConfig, RetryConfig, ToolsConfig,
};
