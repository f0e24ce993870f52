//! Conversation item definitions
//!
//! A session's chat context is an ordered list of items. Ids are unique for
//! the lifetime of a session and survive migration between personas, which
//! is what makes context copying idempotent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a conversation item, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item_{}", self.0)
    }
}

/// What an item represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Message,
    ToolCall,
    ToolResult,
}

/// Who authored an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        write!(f, "{}", s)
    }
}

/// One entry in a chat context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub role: Role,
    pub content: String,
}

impl ConversationItem {
    /// A plain message
    pub fn message(id: ItemId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            kind: ItemKind::Message,
            role,
            content: content.into(),
        }
    }

    /// A tool invocation issued by the assistant
    pub fn tool_call(id: ItemId, content: impl Into<String>) -> Self {
        Self {
            id,
            kind: ItemKind::ToolCall,
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// The output of a tool invocation
    pub fn tool_result(id: ItemId, content: impl Into<String>) -> Self {
        Self {
            id,
            kind: ItemKind::ToolResult,
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Tool calls and tool results
    pub fn is_tool(&self) -> bool {
        matches!(self.kind, ItemKind::ToolCall | ItemKind::ToolResult)
    }

    /// System-role messages (persona instructions, entry prompts)
    pub fn is_system_message(&self) -> bool {
        self.kind == ItemKind::Message && self.role == Role::System
    }
}

impl fmt::Display for ConversationItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ItemKind::Message => write!(f, "[{}] {}: {}", self.id, self.role, self.content),
            ItemKind::ToolCall => write!(f, "[{}] tool_call: {}", self.id, self.content),
            ItemKind::ToolResult => write!(f, "[{}] tool_result: {}", self.id, self.content),
        }
    }
}
