//! Accumulating a streamed reply into text.

use std::fmt::Display;
use std::pin::pin;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Failed | StreamState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed(String),
    Cancelled(String),
}

impl StreamOutcome {
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed(text) | StreamOutcome::Cancelled(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            StreamOutcome::Completed(text) | StreamOutcome::Cancelled(text) => text,
        }
    }
}

/// Decodes UTF-8 across chunk boundaries. A character split between two
/// chunks is held back until its remaining bytes arrive.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8], out: &mut String) {
        self.pending.extend_from_slice(bytes);
        let mut start = 0;

        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending[start..start + valid_up_to]) {
                        out.push_str(valid);
                    }
                    start += valid_up_to;
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start += len;
                        }
                        None => break,
                    }
                }
            }
        }

        self.pending.drain(..start);
    }

    fn finish(&mut self, out: &mut String) {
        if !self.pending.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

/// Reads a byte stream to the end, reporting the accumulated text after
/// every chunk.
///
/// One aggregator handles one stream: `Idle -> Streaming -> {Completed,
/// Failed, Cancelled}`.
#[derive(Debug)]
pub struct StreamAggregator {
    state: StreamState,
    buffer: String,
    decoder: Utf8Decoder,
    cancel: CancellationToken,
    chunks: usize,
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            state: StreamState::Idle,
            buffer: String::new(),
            decoder: Utf8Decoder::default(),
            cancel,
            chunks: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Text accumulated so far. After a failure this is the partial reply.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Token that stops the stream. Cancelling more than once is harmless.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Consume `stream`, calling `on_update` with the full text so far after
    /// each chunk. Updates are delivered in read order and never after
    /// cancellation.
    pub async fn run<S, B, E, F>(
        &mut self,
        stream: S,
        mut on_update: F,
    ) -> Result<StreamOutcome, StreamError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        F: FnMut(&str),
    {
        if self.state != StreamState::Idle {
            return Err(StreamError::NotIdle(self.state));
        }
        self.state = StreamState::Streaming;

        let mut stream = pin!(stream);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = stream.next() => Some(item),
            };

            let Some(item) = next else {
                self.state = StreamState::Cancelled;
                debug!(chunks = self.chunks, "stream cancelled");
                return Ok(StreamOutcome::Cancelled(self.buffer.clone()));
            };

            match item {
                Some(Ok(chunk)) => {
                    self.chunks += 1;
                    self.decoder.decode(chunk.as_ref(), &mut self.buffer);
                    if self.cancel.is_cancelled() {
                        continue;
                    }
                    on_update(&self.buffer);
                }
                Some(Err(err)) => {
                    self.state = StreamState::Failed;
                    debug!(chunks = self.chunks, error = %err, "stream read failed");
                    return Err(StreamError::Read {
                        message: err.to_string(),
                        partial: self.buffer.clone(),
                    });
                }
                None => {
                    self.decoder.finish(&mut self.buffer);
                    self.state = StreamState::Completed;
                    debug!(chunks = self.chunks, chars = self.buffer.len(), "stream completed");
                    return Ok(StreamOutcome::Completed(self.buffer.clone()));
                }
            }
        }
    }
}
