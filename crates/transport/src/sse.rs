//! Server-sent event reassembly for chat completion streams.
//!
//! The backend answers with a `text/event-stream` body:
//!
//! ```text
//! data: {"id":"chatcmpl_1","object":"chat.completion.chunk","choices":[{"delta":{"content":"Hel"}}]}
//!
//! data: {"id":"chatcmpl_1","object":"chat.completion.sources","sources":[...]}
//!
//! data: [DONE]
//! ```
//!
//! [`FrameDecoder`] turns arbitrarily split bytes into [`Decoded`] items and
//! [`read_events`] drives it from an async byte stream.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use ragstream_core::error::TransportError;
use ragstream_core::message::SourceRef;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Payload that terminates the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest line the decoder buffers before dropping it.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// A decoded record from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental piece of the answer.
    Chunk {
        id: Option<String>,
        delta: Option<String>,
    },

    /// The final reference list for the answer.
    Sources {
        id: Option<String>,
        sources: Vec<SourceRef>,
    },
}

/// Output of the frame decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(StreamEvent),
    /// The `[DONE]` sentinel was seen.
    Done,
}

/// How a read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The server sent `[DONE]`.
    Done,
    /// The body ended without the sentinel.
    Eof,
    /// The cancellation token fired.
    Cancelled,
}

/// Incremental SSE frame parser.
///
/// Bytes are buffered until a full line is available, so UTF-8 sequences
/// split across reads are decoded intact. After the sentinel the decoder
/// ignores all further input. A line longer than the limit is dropped
/// together with the frame it belongs to.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline
    scanned: usize,
    data: Vec<String>,
    max_line: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
    done: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            max_line,
            discarding: false,
            done: false,
        }
    }

    /// Whether the sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes of an incomplete frame still held back.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len() + self.data.iter().map(String::len).sum::<usize>()
    }

    /// Feed the next piece of the body and collect every completed item.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buf.extend_from_slice(bytes);

        let mut consumed = 0;
        let mut search_from = self.scanned;
        while let Some(pos) = self.buf[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + pos;
            let start = consumed;
            consumed = end + 1;
            search_from = consumed;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            let raw = &self.buf[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();

            if let Some(item) = self.handle_line(&line) {
                let finished = item == Decoded::Done;
                out.push(item);
                if finished {
                    self.buf.clear();
                    self.scanned = 0;
                    self.data.clear();
                    return out;
                }
            }
        }
        self.buf.drain(..consumed);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            warn!(
                bytes = self.buf.len(),
                limit = self.max_line,
                "Dropping oversized SSE line and its frame"
            );
            self.buf.clear();
            self.scanned = 0;
            self.data.clear();
            self.discarding = true;
        }
        out
    }

    fn handle_line(&mut self, line: &str) -> Option<Decoded> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        } else {
            trace!(field, "Ignoring SSE field");
        }
        None
    }

    fn dispatch(&mut self) -> Option<Decoded> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();

        if payload.trim() == DONE_SENTINEL {
            self.done = true;
            return Some(Decoded::Done);
        }
        decode_record(&payload).map(Decoded::Event)
    }
}

/// Decode one frame payload. Returns `None` for anything that isn't a
/// well-formed record we care about.
pub fn decode_record(payload: &str) -> Option<StreamEvent> {
    let record = match serde_json::from_str::<WireRecord>(payload) {
        Ok(r) => r,
        Err(e) => {
            trace!(data = %payload, error = %e, "Ignoring unparseable SSE frame");
            return None;
        }
    };

    match record {
        WireRecord::Chunk(chunk) => {
            let delta = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty());
            let id = chunk.id.filter(|id| !id.is_empty());
            if delta.is_none() && id.is_none() {
                return None;
            }
            Some(StreamEvent::Chunk { id, delta })
        }
        WireRecord::Sources(record) => Some(StreamEvent::Sources {
            id: record.id.filter(|id| !id.is_empty()),
            sources: record.sources,
        }),
        WireRecord::Unknown => {
            trace!("Ignoring SSE record with unknown object type");
            None
        }
    }
}

/// Read `stream` to the end, handing every event to `on_event`.
///
/// Stops at the sentinel, at the end of the body (treated as an implicit
/// done) or as soon as `cancel` fires. Read failures are returned as errors.
pub async fn read_events<S, B, F>(
    mut stream: S,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<StreamEnd, TransportError>
where
    S: Stream<Item = Result<B, TransportError>> + Unpin,
    B: AsRef<[u8]>,
    F: FnMut(StreamEvent),
{
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stream read cancelled");
                return Ok(StreamEnd::Cancelled);
            }
            next = stream.next() => next,
        };

        let Some(chunk) = next else {
            if decoder.pending_bytes() > 0 {
                debug!(pending = decoder.pending_bytes(), "Discarding unterminated trailing frame");
            }
            debug!("Stream ended without [DONE]");
            return Ok(StreamEnd::Eof);
        };

        for item in decoder.push(chunk?.as_ref()) {
            match item {
                Decoded::Event(event) => on_event(event),
                Decoded::Done => return Ok(StreamEnd::Done),
            }
        }
    }
}

/// Convenience for tests and fixtures: a finished body as a byte stream.
pub fn body_stream(
    parts: Vec<Vec<u8>>,
) -> impl Stream<Item = Result<Bytes, TransportError>> + Unpin {
    futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from(p))))
}

// --- Wire types ---

/// A `data:` payload, discriminated by its `object` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "object")]
enum WireRecord {
    #[serde(rename = "chat.completion.chunk")]
    Chunk(WireChunk),
    #[serde(rename = "chat.completion.sources")]
    Sources(WireSources),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSources {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sources: Vec<SourceRef>,
}
