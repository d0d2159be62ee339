// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use otto_model::{
    AssistantMessage, CompletionRequest, ContentBlock, ErrorKind, ModelProvider, ProviderError,
    StreamDelta,
};
use otto_resilience::{BackoffState, CircuitBreaker, RetryPolicy, Sleeper, TokioSleeper};

pub type TextChunkFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-invoke options.  `on_text_chunk` observes streamed text as it
/// arrives; block accumulation happens regardless.
#[derive(Clone, Default)]
pub struct InvokeOptions {
    pub on_text_chunk: Option<TextChunkFn>,
}

/// The resilient provider call path: validation, circuit breaker gate,
/// retry loop with backoff, stream accumulation.
pub struct ResilientClient {
    provider: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    sleeper: Arc<dyn Sleeper>,
}

impl ResilientClient {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        policy: RetryPolicy,
        breaker: CircuitBreaker,
    ) -> Self {
        Self { provider, policy, breaker, sleeper: Arc::new(TokioSleeper) }
    }

    /// Swap the sleeper (deterministic retry timing in tests).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Issue one completion, retrying per policy.
    ///
    /// The breaker is consulted before every attempt: when it is open the
    /// call fails fast as `Overloaded` without reaching the provider, and a
    /// breaker opened by this very retry loop cuts the loop short.
    pub async fn invoke(
        &self,
        req: CompletionRequest,
        opts: InvokeOptions,
    ) -> Result<AssistantMessage, ProviderError> {
        if req.model.is_empty() {
            return Err(ProviderError::invalid_request("empty model name"));
        }
        if req.system_prompt.is_empty() {
            return Err(ProviderError::invalid_request("empty system prompt"));
        }
        if req.messages.is_empty() {
            return Err(ProviderError::invalid_request("empty message history"));
        }

        let mut backoff = BackoffState::new();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if !self.breaker.allow() {
                return Err(ProviderError::new(
                    ErrorKind::Overloaded,
                    "circuit breaker open",
                ));
            }
            match self.call_once(req.clone(), &opts).await {
                Ok(msg) => {
                    self.breaker.record_success();
                    return Ok(msg);
                }
                Err(err) => {
                    // Cancellation is caller-initiated, not a provider-health
                    // signal; it bypasses breaker bookkeeping so a suspension
                    // or shutdown cascade cannot trip the breaker and block
                    // unrelated tasks.
                    if err.kind == ErrorKind::Canceled {
                        return Err(err);
                    }
                    self.breaker.record_failure();
                    if !err.is_retryable() || attempt >= self.policy.max_attempts {
                        return Err(err);
                    }
                    let delay = backoff.next_delay(
                        &self.policy,
                        attempt,
                        err.retry_after,
                        err.kind.is_transient_server(),
                    );
                    debug!(
                        attempt,
                        kind = %err.kind,
                        delay_ms = delay.as_millis() as u64,
                        "provider call failed; backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    /// One provider call: stream until EOF, accumulating text, tool calls
    /// and usage into an [`AssistantMessage`].
    async fn call_once(
        &self,
        req: CompletionRequest,
        opts: &InvokeOptions,
    ) -> Result<AssistantMessage, ProviderError> {
        let mut stream = self.provider.stream(req).await?;

        let mut text = String::new();
        // Keyed by the parallel-tool-call index from the provider: argument
        // fragments for different calls may interleave.
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
        let mut usage = otto_model::Usage::default();

        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::Text(t) if !t.is_empty() => {
                    if let Some(cb) = &opts.on_text_chunk {
                        cb(&t);
                    }
                    text.push_str(&t);
                }
                StreamDelta::Text(_) => {}
                StreamDelta::ToolCall { index, id, name, arguments } => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        ptc.name = name;
                    }
                    ptc.args_buf.push_str(&arguments);
                }
                StreamDelta::Usage(u) => usage.add(&u),
                StreamDelta::Done => break,
            }
        }

        let mut blocks = Vec::new();
        if !text.is_empty() {
            blocks.push(ContentBlock::text(text));
        }
        // Flush accumulated parallel tool calls ordered by index.  Calls
        // with an empty name cannot be dispatched and are dropped — storing
        // them would corrupt the history sent back on the next turn.
        let mut pending_sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        pending_sorted.sort_by_key(|(idx, _)| *idx);
        for (i, (_, ptc)) in pending_sorted.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name from model");
                continue;
            }
            blocks.push(ptc.finish(i));
        }

        Ok(AssistantMessage { blocks, usage })
    }
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Resolve to a ToolCall block.  Arguments always resolve to a JSON
    /// object: an empty or unparseable buffer substitutes `{}` so the turn
    /// can complete and the tool reports the bad input instead of the whole
    /// request being rejected downstream.
    fn finish(self, ordinal: usize) -> ContentBlock {
        let args = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        error = %e,
                        "model sent invalid JSON tool arguments; substituting {{}}"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        let id = if self.id.is_empty() {
            warn!(tool_name = %self.name, "tool call with empty id; generating synthetic id");
            format!("tc_synthetic_{ordinal}")
        } else {
            self.id
        };
        ContentBlock::ToolCall { id, tool_name: self.name, args }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
