// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    provider::DeltaStream, CompletionRequest, ModelProvider, ProviderError, StreamDelta, Usage,
};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> Result<DeltaStream, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .and_then(|m| m.as_text())
            .unwrap_or("[no input]")
            .to_string();
        let deltas: Vec<Result<StreamDelta, ProviderError>> = vec![
            Ok(StreamDelta::Text(format!("MOCK: {reply}"))),
            Ok(StreamDelta::Usage(Usage {
                input_tokens: 10,
                output_tokens: 10,
                ..Usage::default()
            })),
            Ok(StreamDelta::Done),
        ];
        Ok(Box::pin(stream::iter(deltas)))
    }
}

/// One scripted provider call: either a delta sequence or an up-front error.
pub type ScriptedCall = Result<Vec<StreamDelta>, ProviderError>;

/// A pre-scripted provider.  Each `stream` call pops the next script from
/// the front of the queue, so tests can specify exact delta sequences —
/// including tool calls and typed failures — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<ScriptedCall>>,
    calls: AtomicUsize,
    /// The last request seen, so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<ScriptedCall>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(text_script(reply))])
    }

    /// Convenience: provider that returns a tool call, then a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Ok(vec![
                StreamDelta::ToolCall {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                StreamDelta::Done,
            ]),
            Ok(text_script(final_text)),
        ])
    }

    /// Number of times `stream` was invoked.
    pub fn invocations(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A one-text-reply delta script with nominal usage counters.
pub fn text_script(reply: impl Into<String>) -> Vec<StreamDelta> {
    vec![
        StreamDelta::Text(reply.into()),
        StreamDelta::Usage(Usage {
            input_tokens: 5,
            output_tokens: 5,
            ..Usage::default()
        }),
        StreamDelta::Done,
    ]
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }

    async fn stream(&self, req: CompletionRequest) -> Result<DeltaStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(req);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Default fallback when all scripts are consumed
                Ok(text_script("[no more scripts]"))
            } else {
                scripts.remove(0)
            }
        };
        let deltas = script?;
        let wrapped: Vec<Result<StreamDelta, ProviderError>> =
            deltas.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{ChatMessage, ErrorKind};

    fn user_req() -> CompletionRequest {
        CompletionRequest {
            model: "m".into(),
            system_prompt: "s".into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let mut s = MockProvider.stream(user_req()).await.unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamDelta::Text(t) if t.contains("MOCK: hi")));
    }

    #[tokio::test]
    async fn scripted_pops_in_order_and_counts() {
        let p = ScriptedProvider::new(vec![
            Err(ProviderError::from_status(529, "busy")),
            Ok(text_script("ok")),
        ]);
        let err = p.stream(user_req()).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::Overloaded);
        let mut s = p.stream(user_req()).await.unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamDelta::Text(t) if t == "ok"));
        assert_eq!(p.invocations(), 2);
    }

    #[tokio::test]
    async fn scripted_records_last_request() {
        let p = ScriptedProvider::always_text("fine");
        let _ = p.stream(user_req()).await.unwrap();
        let seen = p.last_request.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().system_prompt, "s");
    }

    #[tokio::test]
    async fn scripted_fallback_when_scripts_exhausted() {
        let p = ScriptedProvider::new(vec![]);
        let mut s = p.stream(user_req()).await.unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamDelta::Text(t) if t.contains("no more scripts")));
    }
}
