//! Server-Sent Events (SSE) framing: line reassembly and event classification.
//!
//! Response bodies arrive as arbitrary byte chunks that are not aligned to
//! protocol lines. [`LineBuffer`] carries partial lines across chunks and
//! [`parse_event`] turns each complete line into a [`StreamEvent`].
//!
//! SSE format:
//! ```text
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```

use bytes::BytesMut;
use tracing::{trace, warn};

/// End-of-stream sentinel carried as a `data:` payload.
pub const DONE_MARKER: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// Residual buffer that splits incoming chunks into newline-terminated lines.
///
/// Bytes are buffered rather than text so that a multi-byte UTF-8 sequence
/// split across two chunks is decoded only once the whole line is present.
///
/// # Example
/// ```
/// use chatstream::sse::LineBuffer;
///
/// let mut buffer = LineBuffer::new();
/// assert_eq!(buffer.lines(b"data: a\nda").collect::<Vec<_>>(), vec!["data: a"]);
/// assert_eq!(buffer.lines(b"ta: b\n").collect::<Vec<_>>(), vec!["data: b"]);
/// ```
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: BytesMut,
    /// Length of the buffer prefix known to contain no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the residual buffer without extracting any lines.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Append a chunk and return the complete lines now available.
    ///
    /// The iterator is lazy: lines it does not yield stay buffered and are
    /// returned by the next call.
    pub fn lines(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.push(chunk);
        Lines { buffer: self }
    }

    /// Remove and return the next complete line, without its newline.
    pub fn next_line(&mut self) -> Option<String> {
        let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let pos = self.scanned + offset;
        let line = self.buffer.split_to(pos + 1);
        self.scanned = 0;
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Whether a complete line is waiting in the buffer.
    pub fn has_line(&self) -> bool {
        self.buffer[self.scanned..].contains(&b'\n')
    }

    /// Terminate a trailing unterminated line so it can be drained.
    ///
    /// Used once the connection has closed; buffered complete lines are kept.
    pub fn close(&mut self) {
        if self.buffer.last().is_some_and(|&b| b != b'\n') {
            self.buffer.extend_from_slice(b"\n");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Lazy iterator over the complete lines of a [`LineBuffer`].
pub struct Lines<'a> {
    buffer: &'a mut LineBuffer,
}

impl Iterator for Lines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.buffer.next_line()
    }
}

/// One classified protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    /// A decoded payload.
    Delta(T),
    /// The `[DONE]` sentinel.
    Done,
    /// A `data:` payload that failed to decode; carries the raw payload.
    Malformed(String),
}

/// Parse an SSE line to extract the data portion.
///
/// Accepts both `data: <content>` and `data:<content>`; a trailing `\r` from
/// CRLF framing is dropped along with surrounding whitespace.
///
/// # Example
/// ```
/// use chatstream::sse::parse_sse_line;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"key\": \"value\"}"));
///
/// let line = "invalid";
/// assert_eq!(parse_sse_line(line), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
///
/// # Example
/// ```
/// use chatstream::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == DONE_MARKER
}

/// Classify one complete line, decoding `data:` payloads with `decode`.
///
/// Returns `None` for lines that carry no event: blank keep-alives,
/// `event:`/`id:` fields and `:` comments.
pub fn parse_event<T, F>(line: &str, decode: F) -> Option<StreamEvent<T>>
where
    F: FnOnce(&str) -> Result<T, serde_json::Error>,
{
    let Some(payload) = parse_sse_line(line) else {
        if !line.trim().is_empty() {
            trace!(line, "ignoring non-data line");
        }
        return None;
    };

    if is_done_marker(payload) {
        return Some(StreamEvent::Done);
    }

    match decode(payload) {
        Ok(event) => Some(StreamEvent::Delta(event)),
        Err(e) => {
            warn!(error = %e, payload, "skipping undecodable event payload");
            Some(StreamEvent::Malformed(payload.to_string()))
        }
    }
}
