//! The chat session controller.
//!
//! A session owns the conversation history and drives one turn at a time:
//! submit a question, stream the answer into an assistant message, and end
//! that message in exactly one of `done`, `error` or `aborted`.

use std::sync::{Arc, Mutex};

use ragstream_core::message::{ConversationId, Message, MessageStatus, Role};
use ragstream_core::store::{self, KeyValueStore};
use ragstream_core::transport::{ChatMessage, ChatRequest, ChatTransport, FeedbackRequest, Rating};
use ragstream_transport::sse::{self, StreamEnd, StreamEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::update::TurnUpdate;

/// Cancels whatever turn is currently in flight.
///
/// Cloneable and usable from other tasks (a Ctrl+C handler, a UI close
/// button). Cancelling when nothing is running is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl CancelHandle {
    /// Signal the running turn. Returns whether a turn was signaled.
    pub fn cancel(&self) -> bool {
        let slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    fn install(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(token.clone());
        token
    }

    fn release(&self) {
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

/// A conversation with the RAG service.
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn KeyValueStore>,
    model: String,
    conversation_id: ConversationId,
    messages: Vec<Message>,
    cancel: CancelHandle,
}

impl ChatSession {
    /// Create a session, restoring (or creating) the conversation id in `store`.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn KeyValueStore>,
        model: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let conversation_id = store::load_or_create_conversation_id(store.as_ref())?;
        debug!(conversation_id = %conversation_id, transport = transport.name(), "Session opened");
        Ok(Self {
            transport,
            store,
            model: model.into(),
            conversation_id,
            messages: Vec::new(),
            cancel: CancelHandle::default(),
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The most recent assistant message, if any.
    pub fn last_answer(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Whether an assistant message is still streaming.
    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.status == MessageStatus::Streaming)
    }

    /// A handle that cancels the running turn from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Signal the running turn, if any.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Ask a question and stream the answer to completion.
    pub async fn submit(&mut self, text: &str) -> Result<Message, SessionError> {
        self.submit_with(text, |_| {}).await
    }

    /// Like [`submit`](Self::submit), reporting every change to `on_update`.
    ///
    /// Transport failures do not return `Err`: they end the answer in
    /// `error` (or `aborted` if the turn was cancelled) and the partial
    /// content is kept.
    pub async fn submit_with<F>(&mut self, text: &str, mut on_update: F) -> Result<Message, SessionError>
    where
        F: FnMut(&TurnUpdate),
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        // A turn whose future was dropped mid-stream is still marked streaming.
        self.abort_unfinished();

        let mut history: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.is_terminal() && !m.content.is_empty())
            .map(ChatMessage::from)
            .collect();
        let user = Message::user(text);
        history.push(ChatMessage::from(&user));
        self.messages.push(user);
        self.messages.push(Message::assistant_placeholder());
        let idx = self.messages.len() - 1;

        let token = self.cancel.install();
        let request = self.build_request(history);
        debug!(
            conversation_id = %self.conversation_id,
            message_id = %self.messages[idx].id,
            history = request.messages.len(),
            "Submitting turn"
        );

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.transport.open_stream(request) => Some(result),
        };

        let outcome = match opened {
            None => Ok(StreamEnd::Cancelled),
            Some(Err(e)) => Err(e),
            Some(Ok(body)) => {
                let answer = &mut self.messages[idx];
                sse::read_events(body, &token, |event| apply_event(answer, event, &mut on_update))
                    .await
            }
        };

        let (status, error) = if token.is_cancelled() {
            (MessageStatus::Aborted, None)
        } else {
            match outcome {
                Ok(StreamEnd::Eof) => {
                    debug!("Server closed the stream without [DONE], treating as done");
                    (MessageStatus::Done, None)
                }
                Ok(_) => (MessageStatus::Done, None),
                Err(e) => {
                    warn!(error = %e, "Chat stream failed");
                    (MessageStatus::Error, Some(e.to_string()))
                }
            }
        };

        let answer = &mut self.messages[idx];
        answer.finish(status, error.clone());
        self.cancel.release();
        info!(
            message_id = %answer.id,
            status = %status,
            chars = answer.content.len(),
            sources = answer.sources.len(),
            "Turn finished"
        );
        on_update(&TurnUpdate::Finished { status, error });

        Ok(answer.clone())
    }

    /// Cancel any running turn, forget the history and start a new conversation.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.cancel.cancel();
        self.abort_unfinished();
        self.messages.clear();
        self.conversation_id = store::rotate_conversation_id(self.store.as_ref())?;
        Ok(())
    }

    /// Rate a finished answer. `message_id` may be the local id or the
    /// server completion id.
    pub async fn feedback(
        &self,
        message_id: &str,
        rating: Rating,
        reason: Option<String>,
        comment: Option<String>,
    ) -> Result<(), SessionError> {
        let message = self
            .messages
            .iter()
            .find(|m| {
                m.role == Role::Assistant
                    && (m.id == message_id || m.completion_id.as_deref() == Some(message_id))
            })
            .ok_or_else(|| SessionError::MessageNotFound(message_id.to_string()))?;

        if message.status != MessageStatus::Done {
            return Err(SessionError::NotFinished {
                id: message.id.clone(),
                status: message.status,
            });
        }

        let feedback = FeedbackRequest {
            conversation_id: self.conversation_id.to_string(),
            message_id: message
                .completion_id
                .clone()
                .unwrap_or_else(|| message.id.clone()),
            rating,
            reason,
            comment,
            sources: message
                .sources
                .iter()
                .map(|s| s.url.clone())
                .filter(|u| !u.is_empty())
                .collect(),
        };
        self.transport.send_feedback(feedback).await?;
        Ok(())
    }

    fn build_request(&self, history: Vec<ChatMessage>) -> ChatRequest {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "conversation_id".into(),
            serde_json::Value::String(self.conversation_id.to_string()),
        );
        ChatRequest {
            model: self.model.clone(),
            messages: history,
            stream: true,
            metadata: Some(metadata),
        }
    }

    fn abort_unfinished(&mut self) {
        for m in self.messages.iter_mut().filter(|m| !m.is_terminal()) {
            debug!(message_id = %m.id, "Aborting unfinished answer from an interrupted turn");
            m.finish(MessageStatus::Aborted, None);
        }
        self.cancel.release();
    }
}

/// Apply one stream event to the answer and report what changed.
fn apply_event<F>(answer: &mut Message, event: StreamEvent, on_update: &mut F)
where
    F: FnMut(&TurnUpdate),
{
    match event {
        StreamEvent::Chunk { id, delta } => {
            if let Some(id) = id {
                if answer.record_completion_id(&id) {
                    on_update(&TurnUpdate::CompletionId { id });
                }
            }
            if let Some(content) = delta {
                if answer.append_delta(&content) {
                    on_update(&TurnUpdate::Delta { content });
                }
            }
        }
        StreamEvent::Sources { id, sources } => {
            if let Some(id) = id {
                if answer.record_completion_id(&id) {
                    on_update(&TurnUpdate::CompletionId { id });
                }
            }
            if answer.replace_sources(sources.clone()) {
                on_update(&TurnUpdate::Sources { sources });
            }
        }
    }
}
