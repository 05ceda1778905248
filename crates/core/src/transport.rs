//! Transport trait: the abstraction over the chat backend.
//!
//! A transport knows how to open a streaming chat completion and hand back
//! the raw response body. Framing and decoding of that body happen in the
//! stream reassembler, so any byte source (HTTP, a recorded fixture, a test
//! script) can drive a session.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::message::{Message, Role};

/// Raw response body, delivered in arbitrarily sized pieces.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// One history entry as it goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role,
            content: m.content.clone(),
        }
    }
}

/// Body of a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Public model id of the RAG app
    pub model: String,

    pub messages: Vec<ChatMessage>,

    pub stream: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Thumbs up / thumbs down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

impl std::str::FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "+" | "good" => Ok(Self::Up),
            "down" | "-" | "bad" => Ok(Self::Down),
            other => Err(format!("unknown rating '{other}' (expected up or down)")),
        }
    }
}

/// Feedback on one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub conversation_id: String,

    /// Server completion id of the rated answer
    pub message_id: String,

    pub rating: Rating,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// URLs of the sources shown with the answer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

/// The chat backend a session talks to.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// A human-readable name for this transport.
    fn name(&self) -> &str;

    /// Start a streaming completion and return the response body.
    async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError>;

    /// Submit answer feedback.
    ///
    /// Default implementation reports that feedback isn't supported.
    async fn send_feedback(&self, _feedback: FeedbackRequest) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(format!(
            "Transport '{}' does not accept feedback",
            self.name()
        )))
    }

    /// List the model ids the backend exposes.
    async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        Ok(Vec::new())
    }
}
