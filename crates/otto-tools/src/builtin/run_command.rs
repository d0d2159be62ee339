// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolEnv, ToolError};

const OUTPUT_LIMIT: usize = 100_000;

#[derive(Debug, Deserialize)]
struct RunCommandInput {
    command: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Executes a shell command in the project directory.
///
/// Shell execution is inherently non-idempotent, so the engine never
/// auto-retries it; a timeout or non-zero exit is reported back to the
/// model as a failed tool result.
pub struct RunCommandTool {
    pub timeout_secs: u64,
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Executes a shell command with the project directory as working\n\
         directory. Returns stdout, stderr and the exit code. Output is\n\
         limited to 100,000 characters. Default timeout is 30 seconds;\n\
         set timeout_secs for longer operations. Chain dependent commands\n\
         with '&&' in a single call."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: RunCommandInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        let timeout = Duration::from_secs(input.timeout_secs.unwrap_or(self.timeout_secs));

        debug!(command = %input.command, ?timeout, "run_command tool");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&input.command)
            .current_dir(&env.project_dir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(ToolError::Failed(format!("spawn error: {e}"))),
            Err(_) => {
                return Err(ToolError::Failed(format!(
                    "command timed out after {}s",
                    timeout.as_secs()
                )))
            }
        };

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        truncate_output(&mut stdout);
        truncate_output(&mut stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let result = json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        });
        if exit_code == 0 {
            Ok(result)
        } else {
            Err(ToolError::Failed(result.to_string()))
        }
    }
}

fn truncate_output(s: &mut String) {
    if s.len() > OUTPUT_LIMIT {
        // Keep a valid char boundary.
        let mut cut = OUTPUT_LIMIT;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("\n...[output truncated]");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
