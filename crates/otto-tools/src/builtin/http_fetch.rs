// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolEnv, ToolError};

const DEFAULT_MAX_CHARS: usize = 50_000;

#[derive(Debug, Deserialize)]
struct HttpFetchInput {
    url: String,
    #[serde(default)]
    max_chars: Option<usize>,
}

/// Fetches a URL and returns the (size-capped) body as text.
pub struct HttpFetchTool {
    pub max_chars: usize,
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self { max_chars: DEFAULT_MAX_CHARS }
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetch content from an http(s) URL as text. Read-only GET with a\n\
         30-second timeout and at most 3 redirects. Content is limited to\n\
         50,000 characters by default (override with max_chars)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn run(&self, _env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
        let input: HttpFetchInput =
            serde_json::from_value(input).map_err(ToolError::from_serde)?;
        if !input.url.starts_with("http://") && !input.url.starts_with("https://") {
            return Err(ToolError::InvalidInput(format!(
                "not an http(s) URL: {}",
                input.url
            )));
        }
        let max_chars = input.max_chars.unwrap_or(self.max_chars);

        debug!(url = %input.url, max_chars, "http_fetch tool");

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent("otto-agent/0.4")
            .build()
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let response = client
            .get(&input.url)
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("fetch error: {e}")))?;
        let status = response.status().as_u16();
        let mut body = response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("body error: {e}")))?;

        let truncated = body.chars().count() > max_chars;
        if truncated {
            body = body.chars().take(max_chars).collect();
        }

        Ok(json!({
            "status": status,
            "content": body,
            "truncated": truncated,
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use otto_events::EventBus;
    use otto_model::TaskId;
    use otto_store::MemoryStore;

    fn env() -> ToolEnv {
        ToolEnv {
            project_dir: std::env::temp_dir(),
            task_id: TaskId::new(),
            parent_id: None,
            store: Arc::new(MemoryStore::new()),
            events: Arc::new(EventBus::new()),
        }
    }

    #[tokio::test]
    async fn rejects_non_http_scheme() {
        let err = HttpFetchTool::default()
            .run(&env(), json!({"url": "ftp://example.com/x"}))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_url_is_invalid_input() {
        let err = HttpFetchTool::default().run(&env(), json!({})).await.err().unwrap();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
