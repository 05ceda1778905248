//! # ragstream Core
//!
//! Domain types, traits, and pure algorithms for the ragstream RAG chat
//! client. Nothing here does I/O except the file-backed key-value store.
//!
//! ## Contents
//!
//! - `allocation`: splits a retrieval `top_k` across weighted sources
//! - `citation`: links `[n]` markers in answers to their sources
//! - `message`: the message lifecycle (streaming → done/error/aborted)
//! - `transport`: the trait every chat backend implements
//! - `store`: where the conversation id is persisted

pub mod allocation;
pub mod citation;
pub mod error;
pub mod message;
pub mod store;
pub mod transport;

// Re-export key types at crate root for ergonomics
pub use allocation::{Allocation, Allocator, Binding, allocate, allocate_strict, prepare_bindings};
pub use citation::{link_citations, link_to_sources, rewrite_citations};
pub use error::{AllocationError, StoreError, TransportError};
pub use message::{ConversationId, Message, MessageStatus, Role, SourceRef};
pub use store::{InMemoryStore, JsonFileStore, KeyValueStore};
pub use transport::{ByteStream, ChatMessage, ChatRequest, ChatTransport, FeedbackRequest, Rating};
