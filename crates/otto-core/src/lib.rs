// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod client;
mod coordination_tools;
mod coordinator;
mod driver;
mod engine;
mod invoker;
mod mailbox;
mod router;

pub use agent::{AgentRegistry, AgentSpec};
pub use client::{InvokeOptions, ResilientClient};
pub use coordinator::{ChildReport, CoordError, Coordinator};
pub use engine::{Engine, EngineError};
pub use invoker::ToolInvoker;
pub use router::subscribe_task;
