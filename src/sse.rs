//! Server-Sent Events decoder for streamed completions
//!
//! The body is read line by line. Each `data: {json}` line is decoded into a
//! [`CompletionResponse`] and handed to the consumer over a single-slot
//! channel, so a slow consumer throttles how fast bytes are pulled off the
//! network. `data: [DONE]` or end of input ends the stream normally.

use crate::error::{Error, Result};
use crate::types::CompletionResponse;
use bytes::Bytes;
use futures::stream::{Stream, TryStreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

/// Prefix of an in-band data record
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Prefix of a server-side error record
pub const ERROR_PREFIX: &[u8] = br#"data: {"error":"#;

/// Payload that terminates the stream
pub const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Classification of one trimmed line of the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseFrame<'a> {
    /// Empty line
    Blank,
    /// Data record; holds the payload after the prefix
    Data(&'a [u8]),
    /// Error record emitted by the server
    Error(&'a [u8]),
    /// End-of-stream sentinel
    Done,
    /// Anything else (comments, `event:` lines, garbage)
    Other(&'a [u8]),
}

impl<'a> SseFrame<'a> {
    /// Classify a raw line; surrounding whitespace is ignored
    pub fn parse(line: &'a [u8]) -> Self {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Self::Blank;
        }
        if line.starts_with(ERROR_PREFIX) {
            return Self::Error(line);
        }
        match line.strip_prefix(DATA_PREFIX) {
            Some(payload) if payload == DONE_SENTINEL => Self::Done,
            Some(payload) => Self::Data(payload),
            None => Self::Other(line),
        }
    }
}

/// How a decode task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Body exhausted
    Eof,
    /// `[DONE]` sentinel received
    Done,
    /// Reading the body failed
    ReadError,
    /// The stream was cancelled or dropped by its owner
    Cancelled,
    /// The receiving side went away
    ReceiverDropped,
}

/// Streaming completion response
///
/// Yields decoded responses in arrival order. Dropping the stream cancels
/// the background decode task and releases the connection.
pub struct CompletionStream {
    rx: mpsc::Receiver<Result<CompletionResponse>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl CompletionStream {
    /// Spawn a decode task over a streamed HTTP body
    pub(crate) fn from_body(
        body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    ) -> Self {
        Self::spawn(StreamReader::new(Box::pin(body.map_err(std::io::Error::other))))
    }

    /// Spawn a decode task over any buffered reader
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        tokio::spawn(decode(reader, tx, cancel.child_token()));

        Self {
            rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Get the next response from the stream
    pub async fn next_response(&mut self) -> Option<Result<CompletionResponse>> {
        self.rx.recv().await
    }

    /// Stop decoding and release the underlying body
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for CompletionStream {
    type Item = Result<CompletionResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Decode an event stream until it ends, sending responses on `tx`
///
/// The reader and the sender are dropped on return, which releases the
/// body and closes the channel exactly once whatever the termination.
pub async fn decode<R>(
    mut reader: R,
    tx: mpsc::Sender<Result<CompletionResponse>>,
    cancel: CancellationToken,
) -> Termination
where
    R: AsyncBufRead + Unpin,
{
    let termination = decode_lines(&mut reader, &tx, &cancel).await;
    debug!(?termination, "event stream finished");
    termination
}

async fn decode_lines<R>(
    reader: &mut R,
    tx: &mpsc::Sender<Result<CompletionResponse>>,
    cancel: &CancellationToken,
) -> Termination
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Termination::Cancelled,
            read = reader.read_until(b'\n', &mut line) => read,
        };

        match read {
            Ok(0) => return Termination::Eof,
            // A trailing fragment without a newline is discarded
            Ok(_) if line.last() != Some(&b'\n') => return Termination::Eof,
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "failed to read line");
                return match send(tx, cancel, Err(Error::Stream(err))).await {
                    Some(stop) => stop,
                    None => Termination::ReadError,
                };
            }
        }

        let payload = match SseFrame::parse(&line) {
            SseFrame::Blank => continue,
            SseFrame::Error(raw) | SseFrame::Other(raw) => {
                warn!(line = %String::from_utf8_lossy(raw), "got invalid event");
                continue;
            }
            SseFrame::Done => return Termination::Done,
            SseFrame::Data(payload) => payload,
        };

        let response = match serde_json::from_slice::<CompletionResponse>(payload) {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "failed to decode event payload");
                continue;
            }
        };

        if let Some(stop) = send(tx, cancel, Ok(response)).await {
            return stop;
        }
    }
}

/// Hand one item to the consumer; `Some` means decoding must stop
async fn send(
    tx: &mpsc::Sender<Result<CompletionResponse>>,
    cancel: &CancellationToken,
    item: Result<CompletionResponse>,
) -> Option<Termination> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(Termination::Cancelled),
        sent = tx.send(item) => sent.err().map(|_| Termination::ReceiverDropped),
    }
}
