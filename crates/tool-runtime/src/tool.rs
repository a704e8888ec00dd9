use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Describes a tool's interface for planner consumption.
/// Maps to Claude's tool format and OpenAI's function format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name within one tool set (e.g., "execute_sql_query")
    pub name: String,
    /// Human-readable description for the planner
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Render this definition as an OpenAI-compatible `function` tool.
    pub fn to_openai_function(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema,
            }
        })
    }
}

/// Represents a planner requesting execution of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this invocation (used to match results)
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// JSON input arguments
    pub input: Value,
}

/// Result of executing a tool, sent back to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Must match the ToolCall id
    pub tool_call_id: String,
    /// Result content (text or structured)
    pub content: String,
    /// Whether this result represents an error
    pub is_error: bool,
}

/// Per-invocation context handed to a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Id of the tool call being executed, empty when invoked directly
    pub call_id: String,
    /// Caller-specified deadline for the whole invocation
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn for_call(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Simple echo tool. Used by the stub servers and tests.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the input text.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text to echo back"
                    }
                },
                "required": ["text"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'text' field".to_string()))?;

        Ok(ToolResult {
            tool_call_id: context.call_id.clone(),
            content: text.to_string(),
            is_error: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definition_serialization() {
        let def = ToolDefinition {
            name: "test_tool".to_string(),
            description: "A test tool".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        let json = serde_json::to_string(&def).unwrap();
        let roundtrip: ToolDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip, def);
    }

    #[test]
    fn test_openai_function_shape() {
        let def = EchoTool.definition();
        let rendered = def.to_openai_function();
        assert_eq!(rendered["type"], "function");
        assert_eq!(rendered["function"]["name"], "echo");
        assert_eq!(rendered["function"]["parameters"]["required"][0], "text");
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let tool = EchoTool;
        let ctx = ToolContext::for_call("call_7");
        let result = tool
            .execute(serde_json::json!({"text": "hello world"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.content, "hello world");
        assert_eq!(result.tool_call_id, "call_7");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_echo_tool_missing_text() {
        let err = EchoTool
            .execute(serde_json::json!({}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
