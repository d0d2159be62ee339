// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Named agent definitions.  A Task is always bound to one of these.
    ///
    /// ```yaml
    /// agents:
    ///   default:
    ///     instructions: "You are a helpful assistant."
    ///   scout:
    ///     instructions: "Investigate and report back."
    ///     delegates: []
    /// ```
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

impl Config {
    /// Clamp out-of-range values to their documented bounds.
    ///
    /// Called once after loading; a clamped value is logged rather than
    /// rejected so a single typo does not keep the daemon from starting.
    pub fn normalize(&mut self) {
        self.engine.retry.normalize();
        self.engine.circuit_breaker.normalize();
        if self.engine.turn_limit < 1 {
            warn!(turn_limit = self.engine.turn_limit, "turn_limit below 1; clamping to 1");
            self.engine.turn_limit = 1;
        }
        if self.engine.await_default_timeout_seconds < 1 {
            warn!("await_default_timeout_seconds below 1; clamping to 1");
            self.engine.await_default_timeout_seconds = 1;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "anthropic" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime).
    /// When unset, the key is resolved from the secret store under
    /// `model/<provider>/api_key`.
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Context window of the bound model, in tokens.  The driver fails a
    /// turn with `context_overflow` when the projected prompt exceeds this.
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_context_window() -> u32 {
    200_000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet-4-5".into(),
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            context_window: default_context_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Hard limit on provider calls per user input.  Exceeding it fails the
    /// Task with reason `turn_limit_exceeded`.
    #[serde(default = "default_turn_limit")]
    pub turn_limit: u32,
    /// Default timeout for `await_tasks` when the caller does not pass one.
    #[serde(default = "default_await_timeout")]
    pub await_default_timeout_seconds: u64,
    /// How long shutdown waits for in-flight tools before abandoning them.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_turn_limit() -> u32 {
    50
}
fn default_await_timeout() -> u64 {
    300
}
fn default_drain_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            turn_limit: default_turn_limit(),
            await_default_timeout_seconds: default_await_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// Retry behaviour for provider calls.  Delays follow
/// `initial_delay_ms * multiplier^(attempt-1)` capped at `max_delay_ms`,
/// with ±10 % jitter applied on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first call.  Valid range 1–20.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier, ≥ 1.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Honour provider-directed `retry_after` hints when present.
    #[serde(default = "default_true")]
    pub use_provider_backoff: bool,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl RetryConfig {
    fn normalize(&mut self) {
        if self.max_attempts < 1 || self.max_attempts > 20 {
            warn!(max_attempts = self.max_attempts, "retry.max_attempts outside 1–20; clamping");
            self.max_attempts = self.max_attempts.clamp(1, 20);
        }
        if self.multiplier < 1.0 {
            warn!(multiplier = self.multiplier, "retry.multiplier below 1; clamping to 1");
            self.multiplier = 1.0;
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            use_provider_backoff: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.  Minimum 1.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time the breaker stays open before admitting a half-open probe.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    10_000
}

impl CircuitBreakerConfig {
    fn normalize(&mut self) {
        if self.failure_threshold < 1 {
            warn!("circuit_breaker.failure_threshold below 1; clamping to 1");
            self.failure_threshold = 1;
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Execution timeout for `run_command`, in seconds.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    /// Character cap on `http_fetch` responses.
    #[serde(default = "default_fetch_max_chars")]
    pub fetch_max_chars: usize,
}

fn default_tool_timeout() -> u64 {
    30
}
fn default_fetch_max_chars() -> usize {
    50_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            fetch_max_chars: default_fetch_max_chars(),
        }
    }
}

/// A named agent: system prompt, model binding, tool allowlist, delegates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System prompt for Tasks bound to this agent.
    pub instructions: String,
    /// Model override ("provider/name").  Falls back to the global model.
    pub model: Option<String>,
    /// Leaf tools this agent may use.  Empty means all registered leaf tools.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Agents this agent may spawn sub-tasks for.  Empty means any agent.
    #[serde(default)]
    pub delegates: Vec<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.engine.retry.max_attempts, 5);
        assert_eq!(c.engine.retry.initial_delay_ms, 1_000);
        assert_eq!(c.engine.retry.max_delay_ms, 10_000);
        assert_eq!(c.engine.retry.multiplier, 2.0);
        assert!(c.engine.retry.use_provider_backoff);
        assert_eq!(c.engine.circuit_breaker.failure_threshold, 5);
        assert_eq!(c.engine.circuit_breaker.reset_timeout_ms, 10_000);
        assert_eq!(c.engine.turn_limit, 50);
        assert_eq!(c.engine.await_default_timeout_seconds, 300);
        assert_eq!(c.engine.drain_timeout_secs, 30);
    }

    #[test]
    fn empty_yaml_deserializes_to_defaults() {
        let c: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(c.engine.turn_limit, 50);
        assert_eq!(c.model.provider, "anthropic");
    }

    #[test]
    fn partial_retry_section_keeps_other_defaults() {
        let c: Config = serde_yaml::from_str("engine:\n  retry:\n    max_attempts: 3\n").unwrap();
        assert_eq!(c.engine.retry.max_attempts, 3);
        assert_eq!(c.engine.retry.initial_delay_ms, 1_000);
        assert!(c.engine.retry.use_provider_backoff);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let mut c = Config::default();
        c.engine.retry.max_attempts = 100;
        c.engine.retry.multiplier = 0.5;
        c.engine.circuit_breaker.failure_threshold = 0;
        c.engine.turn_limit = 0;
        c.normalize();
        assert_eq!(c.engine.retry.max_attempts, 20);
        assert_eq!(c.engine.retry.multiplier, 1.0);
        assert_eq!(c.engine.circuit_breaker.failure_threshold, 1);
        assert_eq!(c.engine.turn_limit, 1);
    }

    #[test]
    fn agent_section_parses() {
        let yaml = "agents:\n  scout:\n    instructions: look around\n    delegates: [worker]\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let a = c.agents.get("scout").unwrap();
        assert_eq!(a.instructions, "look around");
        assert_eq!(a.delegates, vec!["worker"]);
        assert!(a.tools.is_empty());
    }
}
