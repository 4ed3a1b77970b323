//! Resumable stream - a byte stream that heals itself
//!
//! Wraps the body of one response and delivers its chunks. When the body fails
//! mid-read, the stream asks the retry policy, issues a narrowed request pinned
//! to the original version, and continues from the first undelivered byte.
//! The consumer sees the same bytes a single uninterrupted transfer would have
//! produced.

use crate::engine::cursor::TransferCursor;
use crate::engine::retry::RetryPolicy;
use crate::error::DownloadError;
use crate::transport::{RangeRequest, Segment, Transport};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use resumio_types::{ByteRange, DownloadEvent, DownloadSettings};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Minimum interval between progress events
const PROGRESS_INTERVAL: Duration = Duration::from_millis(300);

enum State {
    /// Delivering chunks from the current segment
    Streaming(Segment),
    /// Waiting for the transport to return a fresh segment
    Recovering(BoxFuture<'static, Result<Segment, DownloadError>>),
    /// Finished, failed or cancelled
    Done,
}

/// What the last poll of the current state produced
enum Step {
    Chunk(Bytes),
    Failed(DownloadError),
    Ended,
    Resumed(Segment),
    Fatal(DownloadError),
}

/// One logical download, delivered as a stream of chunks
pub struct ResumableStream {
    id: Uuid,
    state: State,
    cursor: TransferCursor,
    policy: RetryPolicy,
    /// Resumptions issued so far
    attempts: u32,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    event_tx: Option<broadcast::Sender<DownloadEvent>>,
    started: bool,
    last_progress: Instant,
    total_size: Option<u64>,
}

impl ResumableStream {
    /// Issue the first fetch for `range` and start streaming it
    pub async fn open(
        transport: Arc<dyn Transport>,
        range: ByteRange,
        settings: &DownloadSettings,
    ) -> Result<Self, DownloadError> {
        if range.is_empty() {
            return Err(DownloadError::InvalidRange(format!(
                "zero-length range at byte {}",
                range.start
            )));
        }

        let segment = transport.fetch(&RangeRequest::initial(range)).await?;
        Self::new(transport, range, segment, RetryPolicy::from(settings))
    }

    /// Start streaming from an already fetched first segment
    pub fn new(
        transport: Arc<dyn Transport>,
        range: ByteRange,
        first: Segment,
        policy: RetryPolicy,
    ) -> Result<Self, DownloadError> {
        let version = first
            .version
            .clone()
            .ok_or(DownloadError::MissingVersionToken)?;
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        info!(
            "Opened download {} for range {} at version {} (max retries {})",
            id,
            range,
            version,
            policy.max_retries()
        );

        Ok(Self {
            id,
            total_size: first.total_size,
            state: State::Streaming(first),
            cursor: TransferCursor::new(range, version),
            policy,
            attempts: 0,
            transport,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            event_tx: None,
            started: false,
            last_progress: Instant::now(),
        })
    }

    /// Report events to `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<DownloadEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Cancel through `token` instead of the stream's own token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancelled = Box::pin(token.clone().cancelled_owned());
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Offset of the next byte to be delivered
    pub fn offset(&self) -> u64 {
        self.cursor.offset()
    }

    /// Bytes still to be delivered (None = to end of object)
    pub fn remaining(&self) -> Option<u64> {
        self.cursor.remaining()
    }

    /// The version token this download is pinned to
    pub fn version(&self) -> &str {
        self.cursor.version()
    }

    /// Resumptions issued so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Size of the whole object, when the server reported it
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// A token that cancels this download when triggered
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the download; the next poll yields [`DownloadError::Cancelled`]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Write every remaining chunk to `writer`, returning the bytes written
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64, DownloadError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Bytes still owed to the consumer, falling back to the object size
    /// reported by the server when the range is open-ended
    fn undelivered(&self) -> Option<u64> {
        self.cursor.remaining().or_else(|| {
            self.total_size
                .map(|total| total.saturating_sub(self.cursor.offset()))
        })
    }

    /// Move to RECOVERING, or hand the error back if it may not be retried
    fn begin_recovery(&mut self, error: DownloadError) -> Result<(), DownloadError> {
        if !self.policy.should_retry(self.attempts, &error) {
            if error.is_transient() && self.policy.is_enabled() {
                warn!(
                    "Download {} giving up after {} resumptions",
                    self.id, self.attempts
                );
            }
            return Err(error);
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let delay = self.policy.delay_for(attempt);

        warn!(
            "Download {} interrupted at byte {} (attempt {}/{}): {}. Resuming in {:?}.",
            self.id,
            self.cursor.offset(),
            attempt,
            self.policy.max_retries(),
            error,
            delay
        );
        self.emit(DownloadEvent::Resuming {
            id: self.id,
            attempt,
            offset: self.cursor.offset(),
            error: error.to_string(),
        });

        let request = self.cursor.resume_request();
        let transport = Arc::clone(&self.transport);

        // Replacing the state releases the interrupted segment before the new fetch starts
        self.state = State::Recovering(
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                transport.fetch(&request).await
            }
            .boxed(),
        );

        Ok(())
    }

    fn check_version(&self, segment: &Segment) -> Result<(), DownloadError> {
        match &segment.version {
            Some(version) if version != self.cursor.version() => {
                Err(DownloadError::VersionMismatch {
                    expected: self.cursor.version().to_string(),
                    actual: Some(version.clone()),
                })
            }
            _ => Ok(()),
        }
    }

    fn fail(&mut self, error: DownloadError) -> DownloadError {
        self.state = State::Done;
        error!(
            "Download {} failed at byte {}: {}",
            self.id,
            self.cursor.offset(),
            error
        );
        self.emit(DownloadEvent::Failed {
            id: self.id,
            error: error.to_string(),
        });
        error
    }

    fn acknowledge_cancel(&mut self) -> DownloadError {
        self.state = State::Done;
        info!(
            "Download {} cancelled at byte {}",
            self.id,
            self.cursor.offset()
        );
        self.emit(DownloadEvent::Cancelled {
            id: self.id,
            offset: self.cursor.offset(),
        });
        DownloadError::Cancelled
    }

    fn complete(&mut self) {
        self.state = State::Done;
        info!(
            "Download {} complete at byte {} after {} resumptions",
            self.id,
            self.cursor.offset(),
            self.attempts
        );
        self.emit(DownloadEvent::Completed {
            id: self.id,
            offset: self.cursor.offset(),
        });
    }

    fn emit_started(&mut self) {
        self.started = true;
        self.emit(DownloadEvent::Started {
            id: self.id,
            offset: self.cursor.offset(),
            remaining: self.cursor.remaining(),
            version: self.cursor.version().to_string(),
            total_size: self.total_size,
        });
    }

    fn emit_progress(&mut self) {
        if self.event_tx.is_none() || self.last_progress.elapsed() < PROGRESS_INTERVAL {
            return;
        }
        self.last_progress = Instant::now();
        self.emit(DownloadEvent::Progress {
            id: self.id,
            offset: self.cursor.offset(),
            remaining: self.cursor.remaining(),
        });
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

impl Stream for ResumableStream {
    type Item = Result<Bytes, DownloadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.is_done() {
                return Poll::Ready(None);
            }

            if this.cancelled.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Some(Err(this.acknowledge_cancel())));
            }

            if !this.started {
                this.emit_started();
            }

            let step = match &mut this.state {
                State::Streaming(segment) => match ready!(segment.body.poll_next_unpin(cx)) {
                    Some(Ok(chunk)) => Step::Chunk(chunk),
                    Some(Err(error)) => Step::Failed(error),
                    None => Step::Ended,
                },
                State::Recovering(fetch) => match ready!(fetch.poll_unpin(cx)) {
                    Ok(segment) => Step::Resumed(segment),
                    Err(error) => Step::Fatal(error),
                },
                State::Done => return Poll::Ready(None),
            };

            match step {
                Step::Chunk(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    // The cursor must cover the chunk before the consumer sees it
                    if let Err(error) = this.cursor.advance(chunk.len() as u64) {
                        return Poll::Ready(Some(Err(this.fail(error))));
                    }
                    this.emit_progress();
                    return Poll::Ready(Some(Ok(chunk)));
                }
                Step::Failed(error) if this.cursor.is_exhausted() => {
                    debug!(
                        "Download {} ignoring error after the last byte: {}",
                        this.id, error
                    );
                    this.complete();
                    return Poll::Ready(None);
                }
                Step::Failed(error) => {
                    if let Err(error) = this.begin_recovery(error) {
                        return Poll::Ready(Some(Err(this.fail(error))));
                    }
                }
                Step::Ended => match this.undelivered() {
                    // With resumption disabled the raw stream passes through as-is
                    Some(remaining) if remaining > 0 && this.policy.is_enabled() => {
                        let error = DownloadError::Truncated {
                            offset: this.cursor.offset(),
                            remaining,
                        };
                        if let Err(error) = this.begin_recovery(error) {
                            return Poll::Ready(Some(Err(this.fail(error))));
                        }
                    }
                    _ => {
                        this.complete();
                        return Poll::Ready(None);
                    }
                },
                Step::Resumed(segment) => {
                    if let Err(error) = this.check_version(&segment) {
                        return Poll::Ready(Some(Err(this.fail(error))));
                    }
                    debug!(
                        "Download {} resumed at byte {} (attempt {})",
                        this.id,
                        this.cursor.offset(),
                        this.attempts
                    );
                    if this.total_size.is_none() {
                        this.total_size = segment.total_size;
                    }
                    this.state = State::Streaming(segment);
                }
                Step::Fatal(error) => {
                    return Poll::Ready(Some(Err(this.fail(error))));
                }
            }
        }
    }
}

impl fmt::Debug for ResumableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Streaming(_) => "streaming",
            State::Recovering(_) => "recovering",
            State::Done => "done",
        };
        f.debug_struct("ResumableStream")
            .field("id", &self.id)
            .field("state", &state)
            .field("cursor", &self.cursor)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}
