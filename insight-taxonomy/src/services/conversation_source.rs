//! Conversation source adapter
//!
//! Paginated access to the external conversation store. Listings are
//! reverse-chronological by `updated_at`; messages are returned per
//! conversation with their own cursor.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ConversationFilters, ConversationSummary, Message, Page};

/// Largest page requested from the source
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Source API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Invalid source response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// One page of conversations, most recently updated first
    async fn list_conversations(
        &self,
        cursor: Option<&str>,
        filters: &ConversationFilters,
        limit: usize,
    ) -> Result<Page<ConversationSummary>, SourceError>;

    /// One page of a conversation's messages
    async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Message>, SourceError>;
}

/// Follow listing cursors until `max` conversations are collected or the
/// source runs out. `None` fetches everything.
pub async fn list_conversations_up_to(
    source: &dyn ConversationSource,
    filters: &ConversationFilters,
    max: Option<usize>,
) -> Result<Vec<ConversationSummary>, SourceError> {
    let mut conversations = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let remaining = max.map(|m| m.saturating_sub(conversations.len()));
        if remaining == Some(0) {
            break;
        }
        let limit = remaining.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE);

        let page = source
            .list_conversations(cursor.as_deref(), filters, limit)
            .await?;
        let received = page.items.len();
        conversations.extend(page.items);

        match page.next_cursor {
            Some(next) if page.has_more && received > 0 => cursor = Some(next),
            _ => break,
        }
    }

    if let Some(max) = max {
        conversations.truncate(max);
    }
    Ok(conversations)
}

/// Fetch up to `cap` messages of one conversation, oldest first
pub async fn fetch_messages(
    source: &dyn ConversationSource,
    conversation_id: &str,
    cap: usize,
) -> Result<Vec<Message>, SourceError> {
    let mut messages = Vec::new();
    let mut cursor: Option<String> = None;

    while messages.len() < cap {
        let page = source
            .list_messages(conversation_id, cursor.as_deref())
            .await?;
        let received = page.items.len();
        messages.extend(page.items);

        match page.next_cursor {
            Some(next) if page.has_more && received > 0 => cursor = Some(next),
            _ => break,
        }
    }

    messages.truncate(cap);
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(messages)
}

/// JSON-over-HTTP conversation store client
pub struct HttpConversationSource {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpConversationSource {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        query: Vec<(&'static str, String)>,
        not_found_id: &str,
    ) -> Result<Page<T>, SourceError> {
        let mut request = self.client.get(&url).query(&query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(not_found_id.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Page<T>>()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ConversationSource for HttpConversationSource {
    async fn list_conversations(
        &self,
        cursor: Option<&str>,
        filters: &ConversationFilters,
        limit: usize,
    ) -> Result<Page<ConversationSummary>, SourceError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        if let Some(after) = filters.after {
            query.push(("after", after.to_rfc3339()));
        }
        if let Some(before) = filters.before {
            query.push(("before", before.to_rfc3339()));
        }
        if let Some(has_messages) = filters.has_messages {
            query.push(("has_messages", has_messages.to_string()));
        }

        tracing::debug!(limit, cursor = ?cursor, "Listing conversations");
        self.get_page(format!("{}/conversations", self.base_url), query, "listing")
            .await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Message>, SourceError> {
        let mut query = Vec::new();
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        self.get_page(
            format!("{}/conversations/{}/messages", self.base_url, conversation_id),
            query,
            conversation_id,
        )
        .await
    }
}

/// Client-side throttle in front of any source.
///
/// The limiter is shared by every caller, so the request ceiling holds no
/// matter how many pipeline workers are active.
pub struct RateLimitedSource<S> {
    inner: S,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl<S: ConversationSource> RateLimitedSource<S> {
    pub fn new(inner: S, requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ConversationSource> ConversationSource for RateLimitedSource<S> {
    async fn list_conversations(
        &self,
        cursor: Option<&str>,
        filters: &ConversationFilters,
        limit: usize,
    ) -> Result<Page<ConversationSummary>, SourceError> {
        self.limiter.until_ready().await;
        self.inner.list_conversations(cursor, filters, limit).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Message>, SourceError> {
        self.limiter.until_ready().await;
        self.inner.list_messages(conversation_id, cursor).await
    }
}
