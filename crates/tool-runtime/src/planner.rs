use crate::conversation::{AssistantTurn, Turn};
use crate::tool::ToolDefinition;
use async_trait::async_trait;

/// The conversational model that decides the next assistant turn.
///
/// Prior turns go in, exactly one assistant turn comes out. The tool set is
/// passed alongside the turns so the planner can request tool calls. The
/// actual model client lives outside this workspace.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_turn(
        &self,
        turns: &[Turn],
        tools: &[ToolDefinition],
    ) -> Result<AssistantTurn, PlannerError>;

    /// Planner name for logging/debugging
    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Mock planner for testing the agentic loop without a real model.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use crate::tool::ToolCall;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns pre-configured turns in the order they were queued.
    #[derive(Default)]
    pub struct MockPlanner {
        replies: Mutex<VecDeque<AssistantTurn>>,
        seen_tools: Mutex<Vec<Vec<String>>>,
    }

    impl MockPlanner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a plain text answer.
        pub fn queue_text(&self, text: &str) {
            self.replies
                .lock()
                .unwrap()
                .push_back(AssistantTurn::text(text));
        }

        /// Queue a single tool call.
        pub fn queue_call(&self, id: &str, name: &str, input: serde_json::Value) {
            self.replies
                .lock()
                .unwrap()
                .push_back(AssistantTurn::calls(vec![ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                }]));
        }

        /// Tool names offered on each call so far.
        pub fn seen_tools(&self) -> Vec<Vec<String>> {
            self.seen_tools.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Planner for MockPlanner {
        async fn next_turn(
            &self,
            _turns: &[Turn],
            tools: &[ToolDefinition],
        ) -> Result<AssistantTurn, PlannerError> {
            self.seen_tools
                .lock()
                .unwrap()
                .push(tools.iter().map(|t| t.name.clone()).collect());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}
