//! Named tools in registration order.
//!
//! The stub server publishes one over `tools/list`, and the MCP adapter fills
//! one with remote operations for the agent loop.

use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::tool::{Tool, ToolDefinition};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateName(String),
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.insert(Arc::new(tool))
    }

    /// Add a shared tool under the name its definition reports. A name is
    /// taken by its first registration.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        match self.tools.entry(tool.definition().name) {
            Entry::Occupied(taken) => Err(RegistryError::DuplicateName(taken.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(tool);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Every definition in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{EchoTool, ToolContext, ToolError, ToolResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.to_string(),
                description: String::new(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            unreachable!("not executed in registry tests")
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_registration_keeps_the_first() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let first = registry.get("echo").unwrap();

        let shared: Arc<dyn Tool> = Arc::new(EchoTool);
        assert!(matches!(
            registry.insert(shared),
            Err(RegistryError::DuplicateName(name)) if name == "echo"
        ));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&first, &registry.get("echo").unwrap()));
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("zeta")).unwrap();
        registry.register(NamedTool("alpha")).unwrap();
        registry.register(NamedTool("mid")).unwrap();

        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }
}
