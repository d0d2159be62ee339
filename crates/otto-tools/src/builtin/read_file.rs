// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolEnv, ToolError};

/// Default number of lines returned when the caller does not specify a limit.
/// Kept small to avoid flooding the model context on the first read; the
/// model can paginate with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct ReadFileInput {
    path: String,
    /// 1-indexed line number to start reading from.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file inside the project directory. Default: 200 lines.\n\
         Lines are formatted as L{n}:content (1-indexed). When more lines\n\
         exist, a pagination notice shows the next offset. Use offset+limit\n\
         to pull only the region you need instead of whole large files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the project directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn run(&self, env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: ReadFileInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        let offset = input.offset.unwrap_or(1).max(1);
        let limit = input.limit.unwrap_or(DEFAULT_LINE_LIMIT).max(1);
        let path = env.resolve_path(&input.path)?;

        debug!(path = %path.display(), offset, limit, "read_file tool");

        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Failed(format!("read error: {e}")))?;

        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset - 1;
        let selected: Vec<String> = all_lines
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, line)| format!("L{}:{}", i + 1, line))
            .collect();
        let last_shown = start + selected.len();
        let mut content = selected.join("\n");
        if last_shown < total {
            content.push_str(&format!(
                "\n...[{} more lines — showing L{}-L{} of {}; use offset={} to continue]",
                total - last_shown,
                offset,
                offset + selected.len().saturating_sub(1),
                total,
                last_shown + 1
            ));
        }

        Ok(json!({ "content": content, "total_lines": total }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
