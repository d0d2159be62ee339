// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use otto_events::EventBus;
use otto_model::TaskId;
use otto_store::Store;

/// Failure modes of a tool invocation.
///
/// Neither variant fails the Task: both are written back to the model as a
/// `ToolResult { succeeded: false }` so it can self-correct on the next turn.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The input did not deserialize against the tool's schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The tool ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    /// Map a serde deserialization failure into `InvalidInput`.
    pub fn from_serde(e: serde_json::Error) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

/// Everything a tool handler may touch, bundled per invocation.
#[derive(Clone)]
pub struct ToolEnv {
    /// Filesystem root the Task may touch; leaf tools resolve inside it.
    pub project_dir: PathBuf,
    pub task_id: TaskId,
    pub parent_id: Option<TaskId>,
    pub store: Arc<dyn Store>,
    pub events: Arc<EventBus>,
}

impl ToolEnv {
    /// Resolve `path` inside the project directory.
    ///
    /// Absolute paths are accepted only when they already point inside the
    /// project root; relative paths are joined onto it.  `..` traversal out
    /// of the root is rejected.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.project_dir.join(candidate)
        };
        // Normalize without touching the filesystem, so the check also holds
        // for paths that do not exist yet.
        let mut normal = PathBuf::new();
        for comp in joined.components() {
            match comp {
                Component::ParentDir => {
                    if !normal.pop() {
                        return Err(ToolError::InvalidInput(format!(
                            "path escapes project directory: {path}"
                        )));
                    }
                }
                Component::CurDir => {}
                other => normal.push(other),
            }
        }
        if !normal.starts_with(&self.project_dir) {
            return Err(ToolError::InvalidInput(format!(
                "path outside project directory: {path}"
            )));
        }
        Ok(normal)
    }
}

/// Trait every built-in and coordination tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the input object
    fn input_schema(&self) -> Value;
    /// Sandboxing hint: true when the tool never mutates observable state.
    fn read_only(&self) -> bool {
        false
    }
    /// Execute the tool.  Input validation failures are `InvalidInput`;
    /// runtime failures are `Failed`.  Both become failed tool results.
    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
