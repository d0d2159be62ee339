// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use otto_model::ToolDescriptor;

use crate::Tool;

/// Central registry holding all available tools.
///
/// Populated at startup and frozen thereafter; all methods take `&self`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors for every registered tool, name-sorted for a stable
    /// prompt prefix (stability is what makes tool-definition caching work).
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut out: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Descriptors restricted to `allowed` names; an empty allowlist means
    /// every tool.
    pub fn descriptors_for(&self, allowed: &[String]) -> Vec<ToolDescriptor> {
        if allowed.is_empty() {
            return self.descriptors();
        }
        self.descriptors()
            .into_iter()
            .filter(|d| allowed.iter().any(|a| a == &d.name))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::{ToolEnv, ToolError};

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn run(&self, _env: &ToolEnv, input: Value) -> Result<Value, ToolError> {
            Ok(json!({ "echo": input }))
        }
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn descriptors_are_name_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "zulu" });
        reg.register(EchoTool { name: "alpha" });
        let names: Vec<String> = reg.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zulu"]);
    }

    #[test]
    fn allowlist_filters_descriptors() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a" });
        reg.register(EchoTool { name: "b" });
        let only_b = reg.descriptors_for(&["b".to_string()]);
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].name, "b");
        assert_eq!(reg.descriptors_for(&[]).len(), 2);
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }
}
