pub mod tool;
pub mod registry;
pub mod runtime;
pub mod planner;
pub mod conversation;

pub use tool::{Tool, ToolCall, ToolContext, ToolDefinition, ToolError, ToolResult};
pub use registry::{RegistryError, ToolRegistry};
pub use runtime::{AgenticLoop, AgenticLoopError};
pub use planner::{Planner, PlannerError};
pub use conversation::{AssistantTurn, Conversation, Turn};
