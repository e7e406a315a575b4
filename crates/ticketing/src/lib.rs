//! Ticketing system integration.
//!
//! This crate is the narrow adapter between the workflow engine and the
//! external ticketing platform:
//! - **Conversation fetch** (`get_conversation`) - the run's single input
//! - **Notes** (`add_note`) - best-effort internal annotations; a failed
//!   note never blocks the state machine
//! - **Context building** (`context`) - normalizes raw conversation data
//!   into the `conversation_history` / `user_details` prompt strings
//!
//! The HTTP client honors a `dry_run` switch that skips all write
//! operations, for offline and test runs.

pub mod context;
mod http;

pub use http::HttpTicketingClient;

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TicketingError {
    #[error("conversation `{conversation_id}` was not found")]
    NotFound { conversation_id: String },
    #[error("ticketing request failed: {message}")]
    Http { message: String },
    #[error("ticketing request timed out")]
    Timeout,
    #[error("ticketing response could not be decoded: {message}")]
    Decode { message: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAttachment {
    pub name: String,
    pub content_type: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<TicketAttachment>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationData {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub messages: Vec<TicketMessage>,
    #[serde(default)]
    pub user: TicketUser,
}

#[async_trait]
pub trait TicketingClient: Send + Sync {
    /// Fetch a conversation. `full` includes the complete message history;
    /// otherwise only the latest page is returned.
    async fn get_conversation(
        &self,
        conversation_id: &str,
        full: bool,
    ) -> Result<ConversationData, TicketingError>;

    /// Post an internal note. Best-effort by contract: callers log failures
    /// and carry on.
    async fn add_note(&self, conversation_id: &str, text: &str) -> Result<(), TicketingError>;
}

/// In-memory client for tests. Conversations are seeded up front; notes are
/// captured for assertions and can be forced to fail.
#[derive(Default)]
pub struct InMemoryTicketing {
    conversations: BTreeMap<String, ConversationData>,
    notes: Mutex<Vec<(String, String)>>,
    fail_notes: bool,
}

impl InMemoryTicketing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversation(mut self, conversation: ConversationData) -> Self {
        self.conversations.insert(conversation.id.clone(), conversation);
        self
    }

    pub fn failing_notes(mut self) -> Self {
        self.fail_notes = true;
        self
    }

    pub fn notes(&self) -> Vec<(String, String)> {
        match self.notes.lock() {
            Ok(notes) => notes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl TicketingClient for InMemoryTicketing {
    async fn get_conversation(
        &self,
        conversation_id: &str,
        _full: bool,
    ) -> Result<ConversationData, TicketingError> {
        self.conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| TicketingError::NotFound { conversation_id: conversation_id.to_string() })
    }

    async fn add_note(&self, conversation_id: &str, text: &str) -> Result<(), TicketingError> {
        if self.fail_notes {
            return Err(TicketingError::Http { message: "notes disabled".to_string() });
        }
        let entry = (conversation_id.to_string(), text.to_string());
        match self.notes.lock() {
            Ok(mut notes) => notes.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}
