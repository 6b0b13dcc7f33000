//! Stream Decoder
//!
//! Turns an arbitrarily chunked SSE byte stream into [`ProtocolEvent`]s.
//!
//! Chunks are appended to a single buffer which is then scanned for complete
//! frames (terminated by a blank line). Complete frames are removed and
//! parsed; an incomplete trailing fragment stays buffered until the next
//! chunk. Only `data:` lines matter. The `[DONE]` sentinel is dropped and
//! ends the sequence.
//!
//! A frame that fails to parse becomes a fatal `Error` event, so the turn it
//! belongs to fails. Decoding still continues past it unless the frame itself
//! claimed to be terminal.
//!
//! [`FrameDecoder`] is the synchronous core. [`decode`] wraps a
//! [`ChunkStream`] in a lazy [`EventStream`]: nothing is read until the
//! consumer polls, and dropping the `EventStream` drops (aborts) the source.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::MirrorError;
use crate::protocol::ProtocolEvent;

/// Payload that marks the end of the frame sequence
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental byte source for one streaming response
pub type ChunkStream = BoxStream<'static, Result<Bytes, MirrorError>>;

// ============================================================================
// Frame Decoder
// ============================================================================

/// Synchronous incremental frame decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Decoded text not yet split into frames
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    partial_utf8: Vec<u8>,
    /// Highest step ordinal seen, for frames that omit theirs
    last_ordinal: i64,
    /// Set once a terminal event was emitted or the input ended
    finished: bool,
    frames_seen: u64,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and drain every complete frame
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.push_bytes(chunk);

        while let Some(frame) = self.next_frame() {
            match self.decode_frame(&frame) {
                Decoded::Skip => {}
                Decoded::Done => {
                    tracing::debug!(frames = self.frames_seen, "done sentinel, decoder finished");
                    self.finish_now();
                    break;
                }
                Decoded::Event { event, stop } => {
                    events.push(event);
                    if stop {
                        tracing::debug!(frames = self.frames_seen, "terminal frame, decoder finished");
                        self.finish_now();
                        break;
                    }
                }
            }
        }

        events
    }

    /// Signal end of input; makes one best-effort attempt on the remainder
    pub fn finish(&mut self) -> Option<ProtocolEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;

        if !self.partial_utf8.is_empty() {
            let tail = std::mem::take(&mut self.partial_utf8);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let remainder = std::mem::take(&mut self.buffer);
        if remainder.trim().is_empty() {
            return None;
        }

        let payload = extract_data_payload(&remainder)?;
        if payload == DONE_SENTINEL {
            return None;
        }
        match ProtocolEvent::from_payload(&payload, self.last_ordinal + 1) {
            Ok(event) => {
                self.observe(&event);
                Some(event)
            }
            Err(err) => {
                tracing::debug!(error = %err, "discarding unparseable trailing fragment");
                None
            }
        }
    }

    /// Whether the decoder will accept no further input
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether no partial frame is buffered
    #[must_use]
    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && self.partial_utf8.is_empty()
    }

    /// Decode a complete SSE body in one shot
    #[must_use]
    pub fn decode_all(input: &[u8]) -> Vec<ProtocolEvent> {
        let mut decoder = Self::new();
        let mut events = decoder.feed(input);
        events.extend(decoder.finish());
        events
    }

    fn finish_now(&mut self) {
        self.finished = true;
        self.buffer.clear();
        self.partial_utf8.clear();
    }

    fn push_bytes(&mut self, chunk: &[u8]) {
        self.partial_utf8.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.partial_utf8);
        let mut rest = bytes.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.partial_utf8 = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }

    fn next_frame(&mut self) -> Option<String> {
        let split = self.buffer.find("\n\n")?;
        let frame = self.buffer[..split].to_string();
        self.buffer.drain(..split + 2);
        Some(frame)
    }

    fn decode_frame(&mut self, frame: &str) -> Decoded {
        let Some(payload) = extract_data_payload(frame) else {
            return Decoded::Skip;
        };
        self.frames_seen += 1;

        if payload == DONE_SENTINEL {
            return Decoded::Done;
        }

        match ProtocolEvent::from_payload(&payload, self.last_ordinal + 1) {
            Ok(event) => {
                self.observe(&event);
                let stop = event.is_terminal();
                Decoded::Event { event, stop }
            }
            Err(err) => {
                let stop = claims_terminal(&payload);
                tracing::warn!(error = %err, stop, "malformed frame");
                Decoded::Event {
                    event: ProtocolEvent::fatal(err.to_string()),
                    stop,
                }
            }
        }
    }

    fn observe(&mut self, event: &ProtocolEvent) {
        if let ProtocolEvent::Step(step) = event {
            self.last_ordinal = self.last_ordinal.max(step.ordinal);
        }
    }
}

/// What one complete frame amounts to
enum Decoded {
    /// No `data:` payload
    Skip,
    /// The `[DONE]` sentinel
    Done,
    /// A decoded event; `stop` ends decoding after it
    Event { event: ProtocolEvent, stop: bool },
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

/// Whether a payload that failed to parse still declares itself terminal
fn claims_terminal(payload: &str) -> bool {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains(r#""type":"final""#) || compact.contains(r#""final":true"#)
}

// ============================================================================
// Event Stream
// ============================================================================

/// Decode a chunk source into a lazy event sequence
#[must_use]
pub fn decode(source: ChunkStream) -> EventStream {
    EventStream {
        source: Some(source),
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
    }
}

/// Lazy, finite, non-restartable sequence of [`ProtocolEvent`]s
///
/// A transport failure mid-stream yields one terminal `Error` event and ends
/// the sequence.
pub struct EventStream {
    source: Option<ChunkStream>,
    decoder: FrameDecoder,
    pending: VecDeque<ProtocolEvent>,
}

impl EventStream {
    /// Abort the underlying source and discard anything not yet yielded
    ///
    /// Idempotent.
    pub fn cancel(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!("event stream cancelled, source released");
        }
        self.pending.clear();
        self.decoder.finish_now();
    }

    /// Whether the underlying source has been released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }
}

impl Stream for EventStream {
    type Item = ProtocolEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }

            let Some(source) = this.source.as_mut() else {
                return Poll::Ready(None);
            };

            match source.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.decoder.feed(&chunk));
                    if this.decoder.is_finished() {
                        this.source = None;
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    tracing::warn!(error = %err, "stream transport failed");
                    this.source = None;
                    this.decoder.finish_now();
                    this.pending.push_back(ProtocolEvent::fatal(err.to_string()));
                }
                Poll::Ready(None) => {
                    this.source = None;
                    this.pending.extend(this.decoder.finish());
                }
            }
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("released", &self.source.is_none())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
