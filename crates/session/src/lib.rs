//! # ragstream Session
//!
//! Drives a conversation against a [`ChatTransport`](ragstream_core::ChatTransport):
//! one streaming turn at a time, each answer ending in exactly one terminal
//! status, cancellable from any task through a [`CancelHandle`].

pub mod error;
pub mod session;
pub mod update;

pub use error::SessionError;
pub use session::{CancelHandle, ChatSession};
pub use update::TurnUpdate;
