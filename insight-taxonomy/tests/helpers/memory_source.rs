//! In-memory conversation source
//!
//! Serves a fixed set of conversations with the same paging contract as the
//! HTTP source: listings newest first, messages newest first in pages.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use insight_taxonomy::models::{
    ConversationFilters, ConversationSummary, Message, MessageRole, Page,
};
use insight_taxonomy::services::{ConversationSource, SourceError};

const MESSAGE_PAGE_SIZE: usize = 4;

struct StoredConversation {
    summary: ConversationSummary,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemorySource {
    conversations: Vec<StoredConversation>,
    failing: HashSet<String>,
    pub list_calls: AtomicUsize,
    pub message_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a conversation whose messages alternate user and assistant turns,
    /// starting with `texts[0]` from the user.
    pub fn with_conversation(
        mut self,
        id: &str,
        updated_at: DateTime<Utc>,
        texts: &[&str],
    ) -> Self {
        let messages = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Message {
                id: format!("{}-m{}", id, i),
                role: if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                },
                content: text.to_string(),
                created_at: updated_at - Duration::minutes((texts.len() - i) as i64),
            })
            .collect();

        self.conversations.push(StoredConversation {
            summary: ConversationSummary {
                id: id.to_string(),
                updated_at,
                title: None,
            },
            messages,
        });
        self.conversations
            .sort_by(|a, b| b.summary.updated_at.cmp(&a.summary.updated_at));
        self
    }

    /// Add `count` conversations about `topic`, each with `message_count`
    /// messages, updated one hour apart starting at `newest`.
    pub fn with_topic(
        mut self,
        prefix: &str,
        topic: &str,
        count: usize,
        message_count: usize,
        newest: DateTime<Utc>,
    ) -> Self {
        for i in 0..count {
            let opening = format!("I need help with {} case {}", topic, i);
            let mut texts: Vec<String> = vec![opening];
            while texts.len() < message_count {
                texts.push(format!("{} follow-up {}", topic, texts.len()));
            }
            let texts: Vec<&str> = texts.iter().map(String::as_str).collect();
            let texts = &texts[..message_count];
            self = self.with_conversation(
                &format!("{}-{}", prefix, i),
                newest - Duration::hours(i as i64),
                texts,
            );
        }
        self
    }

    /// Message listing for `id` fails with a transport error
    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    fn matches(conversation: &StoredConversation, filters: &ConversationFilters) -> bool {
        let updated_at = conversation.summary.updated_at;
        if filters.after.is_some_and(|after| updated_at < after) {
            return false;
        }
        if filters.before.is_some_and(|before| updated_at > before) {
            return false;
        }
        if filters.has_messages == Some(true) && conversation.messages.is_empty() {
            return false;
        }
        true
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<usize, SourceError> {
    cursor
        .map(|c| {
            c.parse()
                .map_err(|_| SourceError::InvalidResponse(format!("bad cursor '{}'", c)))
        })
        .transpose()
        .map(|offset| offset.unwrap_or(0))
}

#[async_trait]
impl ConversationSource for MemorySource {
    async fn list_conversations(
        &self,
        cursor: Option<&str>,
        filters: &ConversationFilters,
        limit: usize,
    ) -> Result<Page<ConversationSummary>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let start = parse_cursor(cursor)?;

        let matching: Vec<&StoredConversation> = self
            .conversations
            .iter()
            .filter(|c| Self::matches(c, filters))
            .collect();
        let end = (start + limit).min(matching.len());
        let items = matching[start.min(end)..end]
            .iter()
            .map(|c| c.summary.clone())
            .collect();

        Ok(Page {
            items,
            next_cursor: Some(end.to_string()),
            has_more: end < matching.len(),
        })
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Message>, SourceError> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(conversation_id) {
            return Err(SourceError::Transport("connection reset".to_string()));
        }

        let conversation = self
            .conversations
            .iter()
            .find(|c| c.summary.id == conversation_id)
            .ok_or_else(|| SourceError::NotFound(conversation_id.to_string()))?;

        let newest_first: Vec<&Message> = conversation.messages.iter().rev().collect();
        let start = parse_cursor(cursor)?;
        let end = (start + MESSAGE_PAGE_SIZE).min(newest_first.len());
        let items = newest_first[start.min(end)..end]
            .iter()
            .map(|m| (*m).clone())
            .collect();

        Ok(Page {
            items,
            next_cursor: Some(end.to_string()),
            has_more: end < newest_first.len(),
        })
    }
}
