//! SSE (Server-Sent Events) decoding
//!
//! Turns the raw byte stream of an OpenAI-compatible streaming response into
//! complete `data:` payloads, regardless of how the network split the bytes.

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Payload of the event's `data:` field(s), joined with `\n`
    Data(String),
    /// The `[DONE]` sentinel that closes an OpenAI stream
    Done,
}

/// Incremental SSE decoder.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences and JSON payloads split across chunks are reassembled before
/// being decoded. An event is dispatched on the blank line that ends it.
///
/// # Example
/// ```
/// use chat_relay::streaming::{SseDecoder, SseFrame};
///
/// let mut decoder = SseDecoder::new();
/// assert!(decoder.feed(b"data: {\"a\":").is_empty());
/// assert_eq!(
///     decoder.feed(b"1}\n\n"),
///     vec![SseFrame::Data("{\"a\":1}".to_string())]
/// );
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and return every event it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush whatever is left once the byte stream has ended.
    ///
    /// Upstreams that close the connection without a trailing blank line
    /// still get their last event delivered.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comments (keep-alives) start with a colon
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_lines.push(value.to_string());
        }
        // event:, id:, retry: carry nothing the relay needs
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();

        if data.trim() == "[DONE]" {
            Some(SseFrame::Done)
        } else {
            Some(SseFrame::Data(data))
        }
    }
}
