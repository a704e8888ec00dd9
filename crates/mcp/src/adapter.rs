//! Aggregated operations as runtime tools.
//!
//! Each [`McpTool`] forwards to [`ToolSet::route_with_timeout`], so remote
//! operations can sit in a `ToolRegistry` next to local tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use toolhub_tool_runtime::{
    RegistryError, Tool, ToolContext, ToolDefinition, ToolError, ToolRegistry, ToolResult,
};

use crate::aggregator::ToolSet;
use crate::error::McpError;

/// A remote operation adapted to the `Tool` trait.
pub struct McpTool {
    tools: Arc<ToolSet>,
    definition: ToolDefinition,
}

impl McpTool {
    /// Adapter for the operation exposed as `name`, if the set has one.
    pub fn new(tools: Arc<ToolSet>, name: &str) -> Option<Self> {
        let definition = tools.operation(name)?.definition();
        Some(Self { tools, definition })
    }
}

#[async_trait]
impl Tool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let name = self.definition.name.as_str();
        let routed = match context.timeout {
            Some(timeout) => self.tools.route_with_timeout(name, input, timeout).await,
            None => self.tools.route(name, input).await,
        };

        match routed {
            Ok(result) => Ok(ToolResult {
                tool_call_id: context.call_id.clone(),
                content: result.text(),
                is_error: false,
            }),
            // The server ran the operation and said no; the planner should see why.
            Err(McpError::ToolExecution { message, .. }) => Ok(ToolResult {
                tool_call_id: context.call_id.clone(),
                content: message,
                is_error: true,
            }),
            Err(McpError::Timeout { after, .. }) => Err(ToolError::Timeout(after)),
            Err(e) => Err(ToolError::ExecutionFailed(e.to_string())),
        }
    }
}

/// One adapter per aggregated operation, in tool-set order.
pub fn tool_adapters(tools: &Arc<ToolSet>) -> Vec<McpTool> {
    tools
        .operations()
        .iter()
        .map(|op| McpTool {
            tools: Arc::clone(tools),
            definition: op.definition(),
        })
        .collect()
}

/// A registry holding every aggregated operation.
pub fn into_registry(tools: &Arc<ToolSet>) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    for tool in tool_adapters(tools) {
        registry.register(tool)?;
    }
    Ok(registry)
}
