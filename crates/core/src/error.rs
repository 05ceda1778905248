//! Error types for the ragstream domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; callers outside the core
//! (session, CLI) wrap them in their own enums.

use thiserror::Error;


/// Fatal failures of the chat transport. Malformed individual frames are
/// never reported through this type.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Request failed: {message} (status: {status_code})")]
    Status { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Not supported: {0}")]
    Unsupported(String),
}

/// Raised only by the strict allocator; the lenient one sanitizes instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    #[error("binding #{index} has an empty source id")]
    EmptySourceId { index: usize },

    #[error("source id '{0}' is bound more than once")]
    DuplicateSourceId(String),

    #[error("source '{source_id}' has an invalid weight: {weight}")]
    InvalidWeight { source_id: String, weight: f64 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Store contents are not valid JSON: {0}")]
    Serialization(String),
}
