//! Conversation and message types exchanged with the conversation source

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation metadata as listed by the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Server-side listing filters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationFilters {
    /// Only conversations updated at or after this instant
    pub after: Option<DateTime<Utc>>,
    /// Only conversations updated at or before this instant
    pub before: Option<DateTime<Utc>>,
    /// Only conversations holding at least one message
    pub has_messages: Option<bool>,
}

/// A conversation selected by a sampler, with its fetched messages
#[derive(Debug, Clone, PartialEq)]
pub struct SampledConversation {
    pub conversation: ConversationSummary,
    pub messages: Vec<Message>,
}

impl SampledConversation {
    pub fn id(&self) -> &str {
        &self.conversation.id
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Render messages as a plain `role: content` transcript
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
