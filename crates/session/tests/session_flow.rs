//! Session integration tests.
//!
//! A scripted transport replays canned response bodies so whole turns can be
//! driven through `ChatSession` without a server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::FutureExt;
use ragstream_core::error::TransportError;
use ragstream_core::message::{MessageStatus, Role};
use ragstream_core::store::{InMemoryStore, JsonFileStore, KeyValueStore};
use ragstream_core::transport::{
    ByteStream, ChatRequest, ChatTransport, FeedbackRequest, Rating,
};
use ragstream_session::{CancelHandle, ChatSession, SessionError, TurnUpdate};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

// ── Scripted transport ───────────────────────────────────────────────────

enum Script {
    /// Serve these body pieces, then end the stream.
    Body(Vec<Result<Bytes, TransportError>>),
    /// Fail before any byte arrives.
    Fail(TransportError),
    /// Serve whatever the test pushes through the channel.
    Live(mpsc::Receiver<Result<Bytes, TransportError>>),
    /// Cancel the turn, then fail to open.
    CancelThenFail(CancelHandle, TransportError),
}

#[derive(Default)]
struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
    feedback: Mutex<Vec<FeedbackRequest>>,
}

impl ScriptedTransport {
    fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn feedback(&self) -> Vec<FeedbackRequest> {
        self.feedback.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, request: ChatRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedTransport exhausted");
        match script {
            Script::Body(parts) => Ok(Box::pin(futures::stream::iter(parts))),
            Script::Fail(err) => Err(err),
            Script::Live(rx) => Ok(Box::pin(ReceiverStream::new(rx))),
            Script::CancelThenFail(handle, err) => {
                handle.cancel();
                Err(err)
            }
        }
    }

    async fn send_feedback(&self, feedback: FeedbackRequest) -> Result<(), TransportError> {
        self.feedback.lock().unwrap().push(feedback);
        Ok(())
    }
}

// ── Body helpers ─────────────────────────────────────────────────────────

fn chunk(id: &str, text: &str) -> String {
    format!(
        "data: {{\"id\":\"{id}\",\"object\":\"chat.completion.chunk\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
        serde_json::to_string(text).unwrap()
    )
}

fn role_chunk(id: &str) -> String {
    format!(
        "data: {{\"id\":\"{id}\",\"object\":\"chat.completion.chunk\",\"choices\":[{{\"index\":0,\"delta\":{{\"role\":\"assistant\"}}}}]}}\n\n"
    )
}

fn sources(id: &str, urls: &[&str]) -> String {
    let list: Vec<serde_json::Value> = urls
        .iter()
        .enumerate()
        .map(|(i, u)| serde_json::json!({"ref": i + 1, "url": u, "title": format!("Doc {}", i + 1)}))
        .collect();
    format!(
        "data: {}\n\n",
        serde_json::json!({"id": id, "object": "chat.completion.sources", "sources": list})
    )
}

const DONE: &str = "data: [DONE]\n\n";

fn body(frames: &[String]) -> Script {
    Script::Body(
        frames
            .iter()
            .map(|f| Ok(Bytes::from(f.clone())))
            .collect(),
    )
}

fn session_with(transport: &Arc<ScriptedTransport>) -> ChatSession {
    ChatSession::new(transport.clone(), Arc::new(InMemoryStore::new()), "docs").unwrap()
}

// ── Turn outcomes ────────────────────────────────────────────────────────

#[tokio::test]
async fn streamed_answer_finishes_done() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(body(&[
        role_chunk("c1"),
        chunk("c1", "Rust is "),
        chunk("c1", "a language [1]."),
        sources("c1", &["https://docs/rust"]),
        DONE.to_string(),
    ]));
    let mut session = session_with(&transport);

    let mut updates = Vec::new();
    let answer = session
        .submit_with("What is Rust?", |u| updates.push(u.clone()))
        .await
        .unwrap();

    assert_eq!(answer.status, MessageStatus::Done);
    assert_eq!(answer.content, "Rust is a language [1].");
    assert_eq!(answer.completion_id.as_deref(), Some("c1"));
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.linked_content(), "Rust is a language [1](https://docs/rust).");
    assert!(answer.error.is_none());
    assert!(!session.is_streaming());

    let kinds: Vec<&str> = updates.iter().map(|u| u.event_type()).collect();
    assert_eq!(
        kinds,
        vec!["completion_id", "delta", "delta", "sources", "finished"]
    );
    assert_eq!(
        updates.last(),
        Some(&TurnUpdate::Finished {
            status: MessageStatus::Done,
            error: None
        })
    );
}

#[tokio::test]
async fn stream_without_sentinel_is_done() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(body(&[chunk("c1", "complete answer")]));
    let mut session = session_with(&transport);

    let answer = session.submit("q").await.unwrap();
    assert_eq!(answer.status, MessageStatus::Done);
    assert_eq!(answer.content, "complete answer");
}

#[tokio::test]
async fn transport_failure_keeps_partial_content() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(Script::Body(vec![
        Ok(Bytes::from(chunk("c1", "partial "))),
        Err(TransportError::StreamInterrupted("connection reset".into())),
    ]));
    let mut session = session_with(&transport);

    let answer = session.submit("q").await.unwrap();
    assert_eq!(answer.status, MessageStatus::Error);
    assert_eq!(answer.content, "partial ");
    assert!(answer.error.as_deref().unwrap().contains("connection reset"));
}

#[tokio::test]
async fn open_failure_ends_in_error() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(Script::Fail(TransportError::Status {
        status_code: 503,
        message: "retriever unavailable".into(),
    }));
    let mut session = session_with(&transport);

    let mut updates = Vec::new();
    let answer = session
        .submit_with("q", |u| updates.push(u.clone()))
        .await
        .unwrap();
    assert_eq!(answer.status, MessageStatus::Error);
    assert!(answer.content.is_empty());
    assert!(answer.error.as_deref().unwrap().contains("503"));
    assert_eq!(updates.len(), 1);
}

#[tokio::test]
async fn cancel_mid_stream_aborts() {
    let transport = Arc::new(ScriptedTransport::default());
    let (tx, rx) = mpsc::channel(8);
    transport.push(Script::Live(rx));
    let mut session = session_with(&transport);
    let handle = session.cancel_handle();

    tx.send(Ok(Bytes::from(chunk("c1", "half an ")))).await.unwrap();

    let answer = session
        .submit_with("q", |u| {
            if matches!(u, TurnUpdate::Delta { .. }) {
                handle.cancel();
            }
        })
        .await
        .unwrap();

    assert_eq!(answer.status, MessageStatus::Aborted);
    assert_eq!(answer.content, "half an ");
    assert!(answer.error.is_none());

    // Bytes arriving after the abort change nothing.
    let _ = tx.send(Ok(Bytes::from(chunk("c1", "answer")))).await;
    assert_eq!(session.last_answer().unwrap().content, "half an ");
    assert!(!session.cancel());
}

#[tokio::test]
async fn cancel_racing_a_failure_aborts() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut session = session_with(&transport);
    transport.push(Script::CancelThenFail(
        session.cancel_handle(),
        TransportError::Network("connection refused".into()),
    ));

    let answer = session.submit("q").await.unwrap();
    assert_eq!(answer.status, MessageStatus::Aborted);
    assert!(answer.error.is_none());
}

#[tokio::test]
async fn dropped_turn_is_aborted_by_next_submit() {
    let transport = Arc::new(ScriptedTransport::default());
    let (tx, rx) = mpsc::channel(8);
    transport.push(Script::Live(rx));
    transport.push(body(&[chunk("c2", "second"), DONE.to_string()]));
    let mut session = session_with(&transport);

    // Poll the first turn once, then drop it while it waits for bytes.
    assert!(session.submit("first").now_or_never().is_none());
    assert!(session.is_streaming());
    drop(tx);

    let answer = session.submit("second").await.unwrap();
    assert_eq!(answer.status, MessageStatus::Done);

    let statuses: Vec<MessageStatus> = session
        .messages()
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(|m| m.status)
        .collect();
    assert_eq!(statuses, vec![MessageStatus::Aborted, MessageStatus::Done]);
}

#[tokio::test]
async fn empty_message_is_rejected() {
    let transport = Arc::new(ScriptedTransport::default());
    let mut session = session_with(&transport);

    let err = session.submit("   \n").await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyMessage));
    assert!(session.messages().is_empty());
    assert!(transport.requests().is_empty());
}

// ── Requests ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_carries_history_and_conversation_id() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(body(&[chunk("c1", "first answer"), DONE.to_string()]));
    transport.push(Script::Fail(TransportError::Network("down".into())));
    transport.push(body(&[chunk("c3", "third answer"), DONE.to_string()]));
    let mut session = session_with(&transport);

    session.submit("one").await.unwrap();
    session.submit("two").await.unwrap();
    session.submit("three").await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    for r in &requests {
        assert_eq!(r.model, "docs");
        assert!(r.stream);
        let meta = r.metadata.as_ref().unwrap();
        assert_eq!(meta["conversation_id"], session.conversation_id().as_str());
    }

    // The failed empty answer is not sent back as history.
    let last: Vec<(Role, &str)> = requests[2]
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        last,
        vec![
            (Role::User, "one"),
            (Role::Assistant, "first answer"),
            (Role::User, "two"),
            (Role::User, "three"),
        ]
    );
}

// ── Conversation id ──────────────────────────────────────────────────────

#[tokio::test]
async fn conversation_id_survives_restart_and_rotates_on_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("session.json");
    let transport = Arc::new(ScriptedTransport::default());

    let first = ChatSession::new(transport.clone(), Arc::new(JsonFileStore::open(&path)), "docs")
        .unwrap()
        .conversation_id()
        .clone();

    let store = Arc::new(JsonFileStore::open(&path));
    let mut session = ChatSession::new(transport.clone(), store.clone(), "docs").unwrap();
    assert_eq!(session.conversation_id(), &first);

    transport.push(body(&[chunk("c1", "hi"), DONE.to_string()]));
    session.submit("hello").await.unwrap();
    session.clear().unwrap();

    assert!(session.messages().is_empty());
    assert_ne!(session.conversation_id(), &first);
    assert_eq!(
        store.get("conversation_id").unwrap().as_deref(),
        Some(session.conversation_id().as_str())
    );
}

#[tokio::test]
async fn clear_aborts_a_dropped_turn() {
    let transport = Arc::new(ScriptedTransport::default());
    let (_tx, rx) = mpsc::channel(1);
    transport.push(Script::Live(rx));
    let mut session = session_with(&transport);

    assert!(session.submit("q").now_or_never().is_none());
    assert!(session.is_streaming());

    session.clear().unwrap();
    assert!(!session.is_streaming());
    assert!(session.messages().is_empty());
}

// ── Feedback ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn feedback_uses_completion_id_and_sources() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(body(&[
        chunk("chatcmpl_7", "answer"),
        sources("chatcmpl_7", &["https://docs/a", "https://docs/b"]),
        DONE.to_string(),
    ]));
    let mut session = session_with(&transport);
    let answer = session.submit("q").await.unwrap();

    session
        .feedback(&answer.id, Rating::Down, Some("outdated".into()), None)
        .await
        .unwrap();
    session
        .feedback("chatcmpl_7", Rating::Up, None, Some("thanks".into()))
        .await
        .unwrap();

    let sent = transport.feedback();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].message_id, "chatcmpl_7");
    assert_eq!(sent[0].rating, Rating::Down);
    assert_eq!(sent[0].reason.as_deref(), Some("outdated"));
    assert_eq!(sent[0].sources, vec!["https://docs/a", "https://docs/b"]);
    assert_eq!(sent[0].conversation_id, session.conversation_id().as_str());
    assert_eq!(sent[1].comment.as_deref(), Some("thanks"));
}

#[tokio::test]
async fn feedback_requires_finished_answer() {
    let transport = Arc::new(ScriptedTransport::default());
    transport.push(Script::Fail(TransportError::Network("down".into())));
    let mut session = session_with(&transport);
    let answer = session.submit("q").await.unwrap();

    let err = session
        .feedback(&answer.id, Rating::Up, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::NotFinished { status: MessageStatus::Error, .. }));

    let err = session
        .feedback("missing", Rating::Up, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::MessageNotFound(_)));
    assert!(transport.feedback().is_empty());
}
