//! Chat stream transport for ragstream.
//!
//! `sse` turns a raw `text/event-stream` body into typed events; `http`
//! implements `ragstream_core::ChatTransport` over reqwest.

pub mod http;
pub mod sse;

pub use http::HttpTransport;
pub use sse::{Decoded, FrameDecoder, StreamEnd, StreamEvent, read_events};
