// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Built-in coordination tools: `spawn_task`, `send_message`, `await_tasks`,
//! `submit_report`.
//!
//! Unlike leaf tools these hold a handle back into the engine, so they live
//! here rather than in the tools crate.  The handle is weak: during
//! shutdown a coordination call fails cleanly instead of keeping the engine
//! alive.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use otto_model::TaskId;
use otto_tools::{Tool, ToolEnv, ToolError};

use crate::engine::EngineInner;

/// Tool names always available to every agent, on top of its leaf allowlist.
pub(crate) const COORDINATION_TOOLS: [&str; 4] =
    ["spawn_task", "send_message", "await_tasks", "submit_report"];

fn engine(handle: &Weak<EngineInner>) -> Result<std::sync::Arc<EngineInner>, ToolError> {
    handle
        .upgrade()
        .ok_or_else(|| ToolError::Failed("engine is shutting down".into()))
}

// ─── spawn_task ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SpawnTaskInput {
    agent: String,
    prompt: String,
}

pub(crate) struct SpawnTaskTool {
    pub(crate) engine: Weak<EngineInner>,
}

#[async_trait]
impl Tool for SpawnTaskTool {
    fn name(&self) -> &str {
        "spawn_task"
    }

    fn description(&self) -> &str {
        "Spawn a sub-task driven by another agent and return its task_id\n\
         immediately — the sub-task runs asynchronously. Use await_tasks to\n\
         block until it finishes and collect the messages it sent back."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the agent to run the sub-task under"
                },
                "prompt": {
                    "type": "string",
                    "description": "The sub-task's first user message"
                }
            },
            "required": ["agent", "prompt"],
            "additionalProperties": false
        })
    }

    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: SpawnTaskInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        let engine = engine(&self.engine)?;
        let child = engine
            .spawn_child(env.task_id, &input.agent, &input.prompt)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        debug!(parent = %env.task_id, child = %child, agent = %input.agent, "sub-task spawned");
        Ok(json!({ "task_id": child.to_string() }))
    }
}

// ─── send_message ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendMessageInput {
    to: String,
    content: Value,
}

pub(crate) struct SendMessageTool {
    pub(crate) engine: Weak<EngineInner>,
}

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "Send a structured message to the parent task's mailbox. Only valid\n\
         for sub-tasks, with to set to \"parent\". The parent receives the\n\
         message when it calls await_tasks."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "enum": ["parent"],
                    "description": "Recipient; only \"parent\" is supported"
                },
                "content": {
                    "description": "Arbitrary JSON payload for the parent"
                }
            },
            "required": ["to", "content"],
            "additionalProperties": false
        })
    }

    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: SendMessageInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        if input.to != "parent" {
            return Err(ToolError::Failed(format!(
                "permission_denied: cannot send to {:?}; only \"parent\" is supported",
                input.to
            )));
        }
        let engine = engine(&self.engine)?;
        engine
            .coordinator
            .deliver_to_parent(env.task_id, input.content)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(json!({ "delivered": true }))
    }
}

// ─── await_tasks ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AwaitTasksInput {
    task_ids: Vec<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

pub(crate) struct AwaitTasksTool {
    pub(crate) engine: Weak<EngineInner>,
}

#[async_trait]
impl Tool for AwaitTasksTool {
    fn name(&self) -> &str {
        "await_tasks"
    }

    fn description(&self) -> &str {
        "Block until each listed sub-task reaches a terminal phase or the\n\
         timeout elapses (default 300 seconds). Every id must be a sub-task\n\
         spawned by this task. Returns, per sub-task, the messages it sent\n\
         to this task in send order."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Sub-task ids returned by spawn_task"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "description": "Maximum seconds to wait (default 300)"
                }
            },
            "required": ["task_ids"],
            "additionalProperties": false
        })
    }

    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: AwaitTasksInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        let mut ids = Vec::with_capacity(input.task_ids.len());
        for raw in &input.task_ids {
            ids.push(
                TaskId::parse(raw)
                    .ok_or_else(|| ToolError::InvalidInput(format!("not a task id: {raw}")))?,
            );
        }
        let timeout = input.timeout_seconds.map(Duration::from_secs);
        let engine = engine(&self.engine)?;
        let reports = engine
            .coordinator
            .await_children(env.task_id, &ids, timeout)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let results: Vec<Value> = reports
            .into_iter()
            .map(|r| json!({ "task_id": r.task_id.to_string(), "messages": r.messages }))
            .collect();
        Ok(json!({ "results": results }))
    }
}

// ─── submit_report ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SubmitReportInput {
    completed: bool,
    #[serde(default)]
    summary: Option<String>,
}

pub(crate) struct SubmitReportTool {
    pub(crate) engine: Weak<EngineInner>,
}

#[async_trait]
impl Tool for SubmitReportTool {
    fn name(&self) -> &str {
        "submit_report"
    }

    fn description(&self) -> &str {
        "Declare this task's work finished. With completed=true the task\n\
         transitions to Completed after the current batch of tool calls;\n\
         use it as the final action of a sub-task."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "completed": {
                    "type": "boolean",
                    "description": "True when the task's goal has been achieved"
                },
                "summary": {
                    "type": "string",
                    "description": "Optional closing summary"
                }
            },
            "required": ["completed"],
            "additionalProperties": false
        })
    }

    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: SubmitReportInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        let engine = engine(&self.engine)?;
        if input.completed {
            engine.coordinator.request_completion(env.task_id);
        }
        Ok(json!({
            "recorded": true,
            "completed": input.completed,
            "summary": input.summary,
        }))
    }
}
