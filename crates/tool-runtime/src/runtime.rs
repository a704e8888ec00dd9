use crate::conversation::Conversation;
use crate::planner::{Planner, PlannerError};
use crate::registry::ToolRegistry;
use crate::tool::{ToolCall, ToolContext, ToolResult};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The core agentic loop that orchestrates Planner ↔ Tool execution.
///
/// Flow: User → Planner → ToolCalls → Execute → Results → Planner → ... → Final Text
pub struct AgenticLoop {
    planner: Arc<dyn Planner>,
    registry: Arc<ToolRegistry>,
    max_iterations: usize,
    tool_timeout: Option<Duration>,
}

impl AgenticLoop {
    pub fn new(planner: Arc<dyn Planner>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            planner,
            registry,
            max_iterations: 10,
            tool_timeout: None,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Deadline applied to every tool invocation the loop makes.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Run a single user turn through the agentic loop.
    /// Returns the final assistant text (empty if the planner gave none).
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        user_message: impl Into<String>,
    ) -> Result<String, AgenticLoopError> {
        conversation.add_user_message(user_message);
        let tools = self.registry.definitions();

        for iteration in 0..self.max_iterations {
            debug!(iteration, planner = self.planner.name(), "Starting agentic loop iteration");

            let turn = self
                .planner
                .next_turn(&conversation.planner_input(), &tools)
                .await?;
            let tool_calls = turn.tool_calls.clone();
            let text = turn.text.clone();
            conversation.add_assistant_turn(turn);

            if tool_calls.is_empty() {
                info!(iteration, "Agentic loop complete");
                return Ok(text.unwrap_or_default());
            }

            info!(count = tool_calls.len(), "Executing tool calls");
            for result in self.execute_tool_calls(&tool_calls).await {
                conversation.add_tool_result(result);
            }
        }

        Err(AgenticLoopError::MaxIterations(self.max_iterations))
    }

    async fn execute_tool_calls(&self, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
        let futures = tool_calls.iter().map(|call| {
            let registry = self.registry.clone();
            let mut ctx = ToolContext::for_call(call.id.clone());
            ctx.timeout = self.tool_timeout;

            async move {
                match registry.get(&call.name) {
                    Some(tool) => match tool.execute(call.input.clone(), &ctx).await {
                        Ok(mut result) => {
                            result.tool_call_id = call.id.clone();
                            result
                        }
                        Err(e) => ToolResult {
                            tool_call_id: call.id.clone(),
                            content: format!("Tool error: {}", e),
                            is_error: true,
                        },
                    },
                    None => ToolResult {
                        tool_call_id: call.id.clone(),
                        content: format!("Unknown tool: {}", call.name),
                        is_error: true,
                    },
                }
            }
        });

        join_all(futures).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgenticLoopError {
    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),
    #[error("Max iterations ({0}) exceeded")]
    MaxIterations(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::planner::mock::MockPlanner;
    use crate::tool::EchoTool;

    fn setup_test_loop() -> (AgenticLoop, Arc<MockPlanner>) {
        let planner = Arc::new(MockPlanner::new());
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let agentic_loop = AgenticLoop::new(planner.clone() as Arc<dyn Planner>, Arc::new(registry));
        (agentic_loop, planner)
    }

    #[tokio::test]
    async fn test_simple_text_response() {
        let (agentic_loop, planner) = setup_test_loop();
        planner.queue_text("Hello, I'm an assistant!");

        let mut conv = Conversation::new(100_000);
        let answer = agentic_loop.run(&mut conv, "Hello").await.unwrap();

        assert_eq!(answer, "Hello, I'm an assistant!");
        assert_eq!(conv.turns().len(), 2);
        assert_eq!(planner.seen_tools(), vec![vec!["echo".to_string()]]);
    }

    #[tokio::test]
    async fn test_tool_call_and_response() {
        let (agentic_loop, planner) = setup_test_loop();
        planner.queue_call("call_1", "echo", serde_json::json!({"text": "test"}));
        planner.queue_text("Done!");

        let mut conv = Conversation::new(100_000);
        let answer = agentic_loop.run(&mut conv, "Echo test").await.unwrap();

        assert_eq!(answer, "Done!");
        // user, assistant (tool call), tool result, assistant (text)
        assert_eq!(conv.turns().len(), 4);
        match &conv.turns()[2] {
            Turn::Tool(result) => {
                assert_eq!(result.tool_call_id, "call_1");
                assert_eq!(result.content, "test");
                assert!(!result.is_error);
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_planner() {
        let (agentic_loop, planner) = setup_test_loop();
        planner.queue_call("call_9", "missing", serde_json::json!({}));
        planner.queue_text("Sorry.");

        let mut conv = Conversation::new(100_000);
        agentic_loop.run(&mut conv, "Use a missing tool").await.unwrap();

        match &conv.turns()[2] {
            Turn::Tool(result) => {
                assert!(result.is_error);
                assert_eq!(result.content, "Unknown tool: missing");
            }
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_max_iterations() {
        let (agentic_loop, planner) = setup_test_loop();
        let agentic_loop = agentic_loop.with_max_iterations(2);
        planner.queue_call("c1", "echo", serde_json::json!({"text": "a"}));
        planner.queue_call("c2", "echo", serde_json::json!({"text": "b"}));

        let mut conv = Conversation::new(100_000);
        let err = agentic_loop.run(&mut conv, "loop forever").await.unwrap_err();
        assert!(matches!(err, AgenticLoopError::MaxIterations(2)));
    }
}
