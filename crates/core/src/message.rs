//! Message, source and conversation domain types.
//!
//! A user submits a turn → the session opens a stream → stream events mutate
//! the assistant message → the message ends in exactly one terminal status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::citation;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The RAG assistant
    Assistant,
    /// System instructions
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Lifecycle status of a message.
///
/// `Streaming` is the only non-terminal status. Once a message leaves it,
/// the message is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Done,
    Error,
    Aborted,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Error => "error",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A structured reference to a retrieved document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceRef {
    /// Server-assigned citation number
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_num: Option<i64>,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SourceRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// The number inline `[n]` markers use for this source: the explicit
    /// `ref` when positive, else the 1-based position in its list.
    pub fn effective_ref(&self, index: usize) -> u64 {
        match self.ref_num {
            Some(n) if n > 0 => n as u64,
            _ => index as u64 + 1,
        }
    }

    /// Title if present, else the URL.
    pub fn label(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.url)
    }
}

/// Find the source an inline `[n]` marker points at.
pub fn resolve_ref(sources: &[SourceRef], n: u64) -> Option<&SourceRef> {
    sources
        .iter()
        .enumerate()
        .find(|(i, s)| s.effective_ref(*i) == n)
        .map(|(_, s)| s)
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Locally generated id, stable for the turn
    pub id: String,

    pub role: Role,

    /// Text content (append-only while streaming)
    pub content: String,

    /// Server-assigned completion id, learned mid-stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_id: Option<String>,

    /// Sources of the answer (replaced wholesale, never merged)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,

    pub status: MessageStatus,

    /// Failure description, only with `MessageStatus::Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn build(role: Role, content: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            completion_id: None,
            sources: Vec::new(),
            status,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new (already final) user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::build(Role::User, content.into(), MessageStatus::Done)
    }

    /// Create an empty assistant message in `Streaming`.
    pub fn assistant_placeholder() -> Self {
        Self::build(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn guard(&self, op: &str) -> bool {
        if self.is_terminal() {
            warn!(message_id = %self.id, status = %self.status, op, "Ignoring mutation of a finished message");
            return false;
        }
        true
    }

    /// Append a content delta. Returns false if the message is frozen.
    pub fn append_delta(&mut self, delta: &str) -> bool {
        if !self.guard("append_delta") {
            return false;
        }
        self.content.push_str(delta);
        true
    }

    /// Record the completion id if none is recorded yet.
    /// Returns true only when the id was newly recorded.
    pub fn record_completion_id(&mut self, id: &str) -> bool {
        if id.is_empty() || self.completion_id.is_some() || !self.guard("record_completion_id") {
            return false;
        }
        self.completion_id = Some(id.to_string());
        true
    }

    /// Replace the source list.
    pub fn replace_sources(&mut self, sources: Vec<SourceRef>) -> bool {
        if !self.guard("replace_sources") {
            return false;
        }
        self.sources = sources;
        true
    }

    /// Move the message into a terminal status. Only the first call wins.
    pub fn finish(&mut self, status: MessageStatus, error: Option<String>) -> bool {
        if !status.is_terminal() || !self.guard("finish") {
            return false;
        }
        self.status = status;
        self.error = if status == MessageStatus::Error { error } else { None };
        true
    }

    /// Content with `[n]` markers linked to this message's source URLs.
    pub fn linked_content(&self) -> String {
        citation::link_to_sources(&self.content, &self.sources)
    }
}
