use crate::tool::{ToolCall, ToolResult};
use serde::{Deserialize, Serialize};

/// One turn of a conversation, tagged by who produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "content", rename_all = "snake_case")]
pub enum Turn {
    /// Standing instructions for the planner
    System(String),
    /// User's text input
    User(String),
    /// Assistant's response (may contain text and/or tool calls)
    Assistant(AssistantTurn),
    /// Result of a tool execution
    Tool(ToolResult),
}

impl Turn {
    /// Role label used when rendering a transcript.
    pub fn role(&self) -> &'static str {
        match self {
            Turn::System(_) => "System",
            Turn::User(_) => "User",
            Turn::Assistant(_) => "Assistant",
            Turn::Tool(_) => "Tool",
        }
    }
}

/// Content from the assistant that can contain mixed text and tool calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    /// Text blocks in the response
    pub text: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }
}

/// Manages conversation history with context window awareness.
pub struct Conversation {
    turns: Vec<Turn>,
    /// Maximum approximate token count before truncation
    max_tokens: usize,
    /// System prompt (always retained, never truncated)
    system_prompt: Option<String>,
}

impl Conversation {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_tokens,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::User(text.into()));
        self.maybe_truncate();
    }

    pub fn add_assistant_turn(&mut self, turn: AssistantTurn) {
        self.turns.push(Turn::Assistant(turn));
        self.maybe_truncate();
    }

    pub fn add_tool_result(&mut self, result: ToolResult) {
        self.turns.push(Turn::Tool(result));
    }

    /// History without the system prompt.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Full planner input: the system prompt (if any) followed by the history.
    pub fn planner_input(&self) -> Vec<Turn> {
        let mut input = Vec::with_capacity(self.turns.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            input.push(Turn::System(prompt.clone()));
        }
        input.extend(self.turns.iter().cloned());
        input
    }

    /// Append a context note to the most recent user turn only.
    ///
    /// Returns `false` when the history holds no user turn.
    pub fn annotate_last_user(&mut self, note: &str) -> bool {
        let last_user = self.turns.iter_mut().rev().find_map(|turn| match turn {
            Turn::User(text) => Some(text),
            _ => None,
        });
        match last_user {
            Some(text) => {
                text.push_str("\n\n[");
                text.push_str(note);
                text.push(']');
                true
            }
            None => false,
        }
    }

    /// Most recent assistant text, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|turn| match turn {
            Turn::Assistant(AssistantTurn { text: Some(text), .. }) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Render the conversation as `Role: content` lines.
    pub fn transcript(&self) -> String {
        self.planner_input()
            .iter()
            .filter_map(|turn| {
                let body = match turn {
                    Turn::System(text) | Turn::User(text) => text.clone(),
                    Turn::Assistant(content) => content.text.clone()?,
                    Turn::Tool(result) => result.content.clone(),
                };
                Some(format!("{}: {}", turn.role(), body))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop all turns but keep the system prompt.
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// Approximate token count using character count / 4 heuristic.
    pub fn approximate_tokens(&self) -> usize {
        let char_count: usize = self
            .turns
            .iter()
            .map(|turn| match turn {
                Turn::System(text) | Turn::User(text) => text.len(),
                Turn::Assistant(content) => {
                    content.text.as_ref().map_or(0, |t| t.len())
                        + content
                            .tool_calls
                            .iter()
                            .map(|tc| tc.input.to_string().len())
                            .sum::<usize>()
                }
                Turn::Tool(result) => result.content.len(),
            })
            .sum();
        char_count / 4
    }

    /// Drop oldest turns when over token limit.
    fn maybe_truncate(&mut self) {
        while self.approximate_tokens() > self.max_tokens && self.turns.len() > 2 {
            // Keep at least the last 2 turns (current exchange)
            self.turns.remove(0);
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_basic() {
        let mut conv = Conversation::new(100_000).with_system_prompt("You are helpful.");
        conv.add_user_message("Hello");
        conv.add_assistant_turn(AssistantTurn::text("Hi there!"));

        assert_eq!(conv.turns().len(), 2);
        let input = conv.planner_input();
        assert_eq!(input.len(), 3);
        assert_eq!(input[0], Turn::System("You are helpful.".to_string()));
        assert_eq!(conv.last_assistant_text(), Some("Hi there!"));
    }

    #[test]
    fn test_conversation_with_tool_calls() {
        let mut conv = Conversation::new(100_000);
        conv.add_user_message("List tables");
        conv.add_assistant_turn(AssistantTurn::calls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "list_tables".to_string(),
            input: serde_json::json!({}),
        }]));
        conv.add_tool_result(ToolResult {
            tool_call_id: "call_1".to_string(),
            content: "Album\nArtist".to_string(),
            is_error: false,
        });

        assert_eq!(conv.turns().len(), 3);
        assert_eq!(conv.last_assistant_text(), None);
    }

    #[test]
    fn test_annotate_only_touches_last_user_turn() {
        let mut conv = Conversation::new(100_000);
        conv.add_user_message("first");
        conv.add_assistant_turn(AssistantTurn::text("ok"));
        conv.add_user_message("second");

        assert!(conv.annotate_last_user("default parent page is abc123"));

        assert_eq!(conv.turns()[0], Turn::User("first".to_string()));
        assert_eq!(
            conv.turns()[2],
            Turn::User("second\n\n[default parent page is abc123]".to_string())
        );
    }

    #[test]
    fn test_annotate_without_user_turn() {
        let mut conv = Conversation::new(100_000);
        assert!(!conv.annotate_last_user("note"));
    }

    #[test]
    fn test_transcript_and_reset() {
        let mut conv = Conversation::new(100_000).with_system_prompt("Be brief.");
        conv.add_user_message("ping");
        conv.add_assistant_turn(AssistantTurn::text("pong"));

        assert_eq!(conv.transcript(), "System: Be brief.\nUser: ping\nAssistant: pong");

        conv.reset();
        assert!(conv.turns().is_empty());
        assert_eq!(conv.system_prompt(), Some("Be brief."));
    }

    #[test]
    fn test_conversation_truncation() {
        let mut conv = Conversation::new(10);
        for i in 0..100 {
            conv.add_user_message(format!("This is a longer message number {} with padding text", i));
        }
        assert!(conv.turns().len() <= 4);
    }

    #[test]
    fn test_turn_serialization_is_role_tagged() {
        let json = serde_json::to_value(Turn::User("hi".to_string())).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
        let back: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(back, Turn::User("hi".to_string()));
    }
}
