//! Session errors.
//!
//! Stream failures are not errors at this level: they end the turn with an
//! `error` or `aborted` message. Only problems outside a turn surface here.

use ragstream_core::error::{StoreError, TransportError};
use ragstream_core::message::MessageStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Refusing to send an empty message")]
    EmptyMessage,

    #[error("No assistant message with id '{0}'")]
    MessageNotFound(String),

    #[error("Message '{id}' is {status}, only finished answers can be rated")]
    NotFinished { id: String, status: MessageStatus },
}
