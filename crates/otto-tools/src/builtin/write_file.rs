// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolEnv, ToolError};

#[derive(Debug, Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
}

/// Writes a file under the project directory, creating parents as needed.
///
/// Overwriting an existing file is reported (`overwritten: true`) rather
/// than treated as an error, so a retried model turn that repeats the call
/// converges instead of failing.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes a file inside the project directory, overwriting any existing\n\
         file at that path. Parent directories are created automatically.\n\
         The result reports whether an existing file was overwritten."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project directory"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: WriteFileInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        let path = env.resolve_path(&input.path)?;

        debug!(path = %path.display(), bytes = input.content.len(), "write_file tool");

        let overwritten = path.exists();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ToolError::Failed(format!("mkdir error: {e}")))?;
            }
        }
        tokio::fs::write(&path, &input.content)
            .await
            .map_err(|e| ToolError::Failed(format!("write error: {e}")))?;

        Ok(json!({
            "bytes_written": input.content.len(),
            "overwritten": overwritten,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
