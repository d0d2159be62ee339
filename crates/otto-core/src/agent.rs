// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use otto_config::AgentConfig;

/// A named agent configuration: system prompt, model binding, tool
/// allowlist, and the agents it may hand sub-tasks to.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub instructions: String,
    /// Model name override; falls back to the globally configured model.
    pub model: Option<String>,
    /// Leaf tools this agent may use.  Empty means all registered leaf tools.
    pub tools: Vec<String>,
    /// Agents this agent may spawn.  Empty means any agent.
    pub delegates: Vec<String>,
}

impl AgentSpec {
    pub fn may_delegate_to(&self, agent: &str) -> bool {
        self.delegates.is_empty() || self.delegates.iter().any(|d| d == agent)
    }
}

/// Agent definitions resolved from config at startup, frozen thereafter.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentSpec>>,
}

impl AgentRegistry {
    pub fn from_config(configs: &HashMap<String, AgentConfig>) -> Self {
        let agents = configs
            .iter()
            .map(|(name, cfg)| {
                (
                    name.clone(),
                    Arc::new(AgentSpec {
                        name: name.clone(),
                        instructions: cfg.instructions.clone(),
                        model: cfg.model.clone(),
                        tools: cfg.tools.clone(),
                        delegates: cfg.delegates.clone(),
                    }),
                )
            })
            .collect();
        Self { agents }
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentSpec>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
