//! Conversation transcript and the per-request transmission window.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        f.write_str(s)
    }
}

/// One message in the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Append-only transcript. The full history is kept for display; requests only see a window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// The trailing `window` turns, without touching stored history.
    pub fn window(&self, window: usize) -> &[ConversationTurn] {
        trailing_window(&self.turns, window)
    }
}

/// Last `window` entries of `turns`.
pub fn trailing_window(turns: &[ConversationTurn], window: usize) -> &[ConversationTurn] {
    let start = turns.len().saturating_sub(window);
    &turns[start..]
}

/// Shape the turns transmitted for one request: exactly one system turn, then the trailing
/// window of non-system turns. System turns already present in `turns` are not forwarded.
pub fn shape_request(
    system_prompt: &str,
    turns: &[ConversationTurn],
    window: usize,
) -> Vec<ConversationTurn> {
    let conversational: Vec<&ConversationTurn> =
        turns.iter().filter(|t| t.role != Role::System).collect();
    let start = conversational.len().saturating_sub(window);

    let mut shaped = Vec::with_capacity(window.min(conversational.len()) + 1);
    shaped.push(ConversationTurn::system(system_prompt));
    shaped.extend(conversational[start..].iter().map(|t| (*t).clone()));
    shaped
}
