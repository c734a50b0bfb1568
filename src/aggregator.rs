//! Re-chunking of upstream deltas into coarser content events
//!
//! Deltas are grouped `chunk_size` at a time. Whatever is left when the
//! upstream closes goes out in exactly one final event, together with the
//! truncation warning if the upstream stopped at the token limit.

use std::num::NonZeroUsize;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{RelayError, GENERAL_ERROR_MESSAGE, MAX_TOKENS_MESSAGE};
use crate::event::StreamEvent;
use crate::upstream::{DeltaStream, DeltaRecord, FinishReason};

/// Lazy sequence of events for the caller
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Running state for one response
#[derive(Debug)]
pub struct Rechunker {
    chunk_size: NonZeroUsize,
    partial_text: String,
    counter: usize,
    pending_warning: Option<String>,
    emitted: usize,
}

impl Rechunker {
    fn new(chunk_size: NonZeroUsize) -> Self {
        Self {
            chunk_size,
            partial_text: String::new(),
            counter: 0,
            pending_warning: None,
            emitted: 0,
        }
    }

    /// Feed one delta; returns a content event when a group is complete.
    pub fn push(&mut self, delta: DeltaRecord) -> Option<StreamEvent> {
        let mut event = None;

        if let Some(text) = delta.text {
            self.partial_text.push_str(&text);
            self.counter += 1;
            if self.counter % self.chunk_size.get() == 0 {
                self.counter = 0;
                self.emitted += 1;
                event = Some(StreamEvent::content(std::mem::take(&mut self.partial_text)));
            }
        }

        if delta.finish_reason == Some(FinishReason::Length) {
            self.pending_warning = Some(MAX_TOKENS_MESSAGE.to_string());
        }

        event
    }

    /// Close a response that ran to completion.
    ///
    /// Always produces an event, even when nothing is buffered.
    pub fn finish(self) -> StreamEvent {
        StreamEvent::content(self.partial_text).with_warning(self.pending_warning)
    }

    /// Close a response that broke off mid-stream.
    ///
    /// Buffered text and a pending truncation warning are kept alongside the
    /// error so nothing already received from the upstream is dropped.
    pub fn fail(self) -> StreamEvent {
        let mut event = StreamEvent::error(GENERAL_ERROR_MESSAGE).with_warning(self.pending_warning);
        if !self.partial_text.is_empty() {
            event.content = Some(self.partial_text);
        }
        event
    }

    /// Content events emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Factory for [`Rechunker`]s with a validated chunk size
#[derive(Debug, Clone, Copy)]
pub struct StreamAggregator {
    chunk_size: NonZeroUsize,
}

impl StreamAggregator {
    /// Create an aggregator; a chunk size of zero is a configuration error.
    pub fn new(chunk_size: usize) -> Result<Self, RelayError> {
        let chunk_size = NonZeroUsize::new(chunk_size).ok_or_else(|| {
            RelayError::InvalidConfig("token chunk size must be at least 1".to_string())
        })?;
        Ok(Self { chunk_size })
    }

    pub fn rechunker(&self) -> Rechunker {
        Rechunker::new(self.chunk_size)
    }

    /// Turn a delta stream into an event stream.
    ///
    /// A failure inside the delta stream ends the event stream with a single
    /// error event; it is never retried.
    pub fn aggregate(&self, deltas: DeltaStream) -> EventStream {
        let mut rechunker = self.rechunker();

        Box::pin(async_stream::stream! {
            let mut deltas = deltas;
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(delta) => {
                        if let Some(event) = rechunker.push(delta) {
                            yield event;
                        }
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            emitted = rechunker.emitted(),
                            "Upstream stream failed mid-response"
                        );
                        yield rechunker.fail();
                        return;
                    }
                }
            }

            debug!(emitted = rechunker.emitted(), "Upstream stream exhausted");
            yield rechunker.finish();
        })
    }
}
