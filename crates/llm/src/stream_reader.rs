//! Chunked Stream Reader
//!
//! Turns a streamed HTTP body into [`StreamEvent`]s. Records are separated by
//! a blank line and carry one or more `data:` lines. Network reads can split
//! a record (or a multi-byte character) anywhere, so bytes are buffered until
//! a record boundary arrives and decoded as a whole.
//!
//! [`EventStream`] layers cancellation and a liveness bound on top of the
//! decoder: cancellation ends the stream silently, a transport failure or a
//! stall ends it with an `error` event.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wiki_lens_core::streaming::{decode_payload, StreamEvent};

use crate::error::{TransportError, TransportResult};

/// A streamed response body.
pub type ByteStream = BoxStream<'static, TransportResult<Bytes>>;

const DATA_PREFIX: &str = "data:";

/// Incremental record decoder holding only the partial-record buffer.
#[derive(Debug, Default)]
pub struct ChunkedStreamReader {
    buffer: Vec<u8>,
    /// Bytes already searched for a record boundary.
    scanned: usize,
    finished: bool,
}

impl ChunkedStreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel or end of input has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one network read; returns the events of every completed record.
    ///
    /// After the sentinel, remaining and later bytes are discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, separator)) = find_record_end(&self.buffer, self.scanned) {
            let record: Vec<u8> = self.buffer.drain(..end + separator).collect();
            self.scanned = 0;
            if let Some(event) = decode_record(&record[..end]) {
                let done = matches!(event, StreamEvent::Done);
                events.push(event);
                if done {
                    self.finished = true;
                    self.buffer.clear();
                    break;
                }
            }
        }
        // A separator may straddle the next read.
        self.scanned = self.buffer.len().saturating_sub(3);
        events
    }

    /// Flush at end of input: decode a trailing record without a separator
    /// and close with `done` unless a terminal event ends the output.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let rest = std::mem::take(&mut self.buffer);
        let mut events: Vec<StreamEvent> = decode_record(&rest).into_iter().collect();
        if !events.last().is_some_and(StreamEvent::is_terminal) {
            events.push(StreamEvent::Done);
        }
        events
    }
}

/// Position and length of the first record separator at or after `from`.
fn find_record_end(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let window = buffer.get(from..)?;
    let lf = window.windows(2).position(|w| w == b"\n\n").map(|i| (from + i, 2));
    let crlf = window
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (from + i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn decode_record(record: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(record);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if data.is_empty() {
        return None;
    }
    decode_payload(&data.join("\n"))
}

/// How an [`EventStream`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The sentinel arrived, or the body ended cleanly
    Completed,
    /// An `error` event was delivered
    Failed {
        message: String,
        retry_after: Option<u64>,
    },
    /// The cancellation token fired; nothing more was delivered
    Cancelled,
}

impl StreamOutcome {
    /// The failure as a typed error; a suggested delay marks a rate limit.
    pub fn failure(&self) -> Option<TransportError> {
        match self {
            StreamOutcome::Failed {
                message,
                retry_after: Some(secs),
            } => Some(TransportError::RateLimited {
                message: message.clone(),
                retry_after: Some(*secs),
            }),
            StreamOutcome::Failed { message, .. } => Some(TransportError::StreamFailed {
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// A decoded, cancellable view over a streamed body.
pub struct EventStream {
    body: ByteStream,
    reader: ChunkedStreamReader,
    pending: VecDeque<StreamEvent>,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
    outcome: Option<StreamOutcome>,
}

enum Chunk {
    Item(Option<TransportResult<Bytes>>),
    Stalled(Duration),
}

impl EventStream {
    pub fn new(body: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            body,
            reader: ChunkedStreamReader::new(),
            pending: VecDeque::new(),
            cancel,
            idle_timeout: None,
            outcome: None,
        }
    }

    /// Fail the stream when no bytes arrive for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set once the stream has ended.
    pub fn outcome(&self) -> Option<&StreamOutcome> {
        self.outcome.as_ref()
    }

    /// Next event in arrival order, or `None` once the stream has ended.
    ///
    /// The last event delivered is always `done` or `error`, except after
    /// cancellation, which delivers nothing further.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if self.outcome.is_some() {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.release();
                return None;
            }
            if let Some(event) = self.pending.pop_front() {
                match &event {
                    StreamEvent::Done => self.outcome = Some(StreamOutcome::Completed),
                    StreamEvent::Error {
                        message,
                        retry_after,
                    } => {
                        self.outcome = Some(StreamOutcome::Failed {
                            message: message.clone(),
                            retry_after: *retry_after,
                        })
                    }
                    _ => {}
                }
                if self.outcome.is_some() {
                    self.drop_body();
                }
                return Some(event);
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                chunk = next_chunk(&mut self.body, self.idle_timeout) => Some(chunk),
            };
            let Some(chunk) = next else {
                self.release();
                return None;
            };

            match chunk {
                Chunk::Item(Some(Ok(bytes))) => {
                    let events = self.reader.push(&bytes);
                    self.pending.extend(events);
                }
                Chunk::Item(Some(Err(err))) => {
                    warn!(error = %err, "stream transport failed");
                    self.pending.push_back(StreamEvent::error(err.to_string()));
                }
                Chunk::Item(None) => {
                    let events = self.reader.finish();
                    if events.is_empty() {
                        self.outcome = Some(StreamOutcome::Completed);
                        return None;
                    }
                    self.pending.extend(events);
                }
                Chunk::Stalled(limit) => {
                    warn!(idle_secs = limit.as_secs(), "stream stalled");
                    self.pending.push_back(StreamEvent::error(format!(
                        "stream stalled: no data for {}s",
                        limit.as_secs()
                    )));
                }
            }
        }
    }

    fn release(&mut self) {
        debug!("stream cancelled, releasing connection");
        self.pending.clear();
        self.outcome = Some(StreamOutcome::Cancelled);
        self.drop_body();
    }

    fn drop_body(&mut self) {
        self.body = futures_util::stream::empty().boxed();
    }
}

async fn next_chunk(body: &mut ByteStream, idle_timeout: Option<Duration>) -> Chunk {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, body.next()).await {
            Ok(item) => Chunk::Item(item),
            Err(_) => Chunk::Stalled(limit),
        },
        None => Chunk::Item(body.next().await),
    }
}

/// Drive `body` to its end, invoking `on_event` once per decoded event.
pub async fn read_stream<F>(
    body: ByteStream,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
    mut on_event: F,
) -> StreamOutcome
where
    F: FnMut(StreamEvent),
{
    let mut events = EventStream::new(body, cancel);
    if let Some(limit) = idle_timeout {
        events = events.with_idle_timeout(limit);
    }
    while let Some(event) = events.next_event().await {
        on_event(event);
    }
    events
        .outcome()
        .cloned()
        .unwrap_or(StreamOutcome::Completed)
}
