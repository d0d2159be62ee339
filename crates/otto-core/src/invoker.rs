// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use otto_events::{EngineEvent, EventBus};
use otto_model::ContentBlock;
use otto_tools::{ToolEnv, ToolError, ToolRegistry};

/// Executes the tool calls a model turn requested and turns each outcome
/// into a `ToolResult` block for the next outbound message.
///
/// Tool failures never fail the Task: the model sees
/// `ToolResult { succeeded: false }` and may self-correct.  Unknown tool
/// names are handled the same way so a hallucinated tool costs one round
/// trip, not the session.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>, bus: Arc<EventBus>) -> Self {
        Self { registry, bus }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Invoke one tool call.  Publishes `ToolCall` before dispatch and
    /// `ToolResult` after, regardless of outcome.
    pub async fn invoke(
        &self,
        env: &ToolEnv,
        call_id: &str,
        tool_name: &str,
        args: &Value,
    ) -> ContentBlock {
        self.bus.publish(EngineEvent::ToolCall {
            task_id: env.task_id,
            tool_name: tool_name.to_string(),
            input: args.clone(),
        });

        let (result, succeeded) = match self.registry.get(tool_name) {
            None => (json!({ "error": format!("unknown tool: {tool_name}") }), false),
            Some(tool) => match tool.run(env, args.clone()).await {
                Ok(output) => (output, true),
                Err(e @ ToolError::InvalidInput(_)) => (json!({ "error": e.to_string() }), false),
                Err(ToolError::Failed(msg)) => (json!({ "error": msg }), false),
            },
        };

        debug!(task = %env.task_id, tool = tool_name, succeeded, "tool call finished");
        self.bus.publish(EngineEvent::ToolResult {
            task_id: env.task_id,
            tool_name: tool_name.to_string(),
            input: args.clone(),
            output: result.clone(),
        });

        ContentBlock::ToolResult {
            id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            result,
            succeeded,
        }
    }

    /// Invoke a batch sequentially, preserving call order.  A running tool
    /// is never cancelled mid-execution; callers check for suspension after
    /// the batch.
    pub async fn invoke_all(
        &self,
        env: &ToolEnv,
        calls: &[(String, String, Value)],
    ) -> Vec<ContentBlock> {
        let mut out = Vec::with_capacity(calls.len());
        for (id, name, args) in calls {
            out.push(self.invoke(env, id, name, args).await);
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
