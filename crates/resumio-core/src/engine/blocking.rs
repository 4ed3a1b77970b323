//! Blocking adapter - a synchronous read loop over a resumable stream
//!
//! Owns a current-thread runtime and drives the stream one chunk at a time.
//! Must not be used from within an async context.

use crate::engine::stream::ResumableStream;
use crate::error::DownloadError;
use crate::transport::Transport;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use resumio_types::{ByteRange, DownloadEvent, DownloadSettings};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A resumable download driven by plain blocking calls
pub struct BlockingDownload {
    // Dropped before the runtime that drives it
    stream: ResumableStream,
    runtime: Runtime,
}

impl BlockingDownload {
    /// Issue the first fetch for `range` and wrap the resulting stream
    pub fn open(
        transport: Arc<dyn Transport>,
        range: ByteRange,
        settings: &DownloadSettings,
    ) -> Result<Self, DownloadError> {
        let runtime = build_runtime()?;
        let stream = runtime.block_on(ResumableStream::open(transport, range, settings))?;
        Ok(Self { stream, runtime })
    }

    /// Wrap a stream whose transport does not depend on a particular runtime
    pub fn from_stream(stream: ResumableStream) -> Result<Self, DownloadError> {
        Ok(Self {
            stream,
            runtime: build_runtime()?,
        })
    }

    /// Report events to `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<DownloadEvent>) -> Self {
        self.stream = self.stream.with_events(event_tx);
        self
    }

    pub fn stream(&self) -> &ResumableStream {
        &self.stream
    }

    /// A token that cancels the download from another thread
    pub fn cancel_handle(&self) -> CancellationToken {
        self.stream.cancel_handle()
    }

    /// Block until the next chunk, or None once the download is done
    pub fn next_chunk(&mut self) -> Option<Result<Bytes, DownloadError>> {
        let stream = &mut self.stream;
        self.runtime.block_on(stream.next())
    }

    /// Write every chunk to `sink` exactly once, returning the bytes written.
    ///
    /// Bytes already written when an error surfaces stay in the sink.
    pub fn read<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64, DownloadError> {
        let mut written = 0u64;
        while let Some(chunk) = self.next_chunk() {
            let chunk = chunk?;
            sink.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        sink.flush()?;
        Ok(written)
    }

    /// Adapt into a [`std::io::Read`] implementation
    pub fn into_reader(self) -> BlockingReader {
        BlockingReader {
            download: self,
            pending: Bytes::new(),
        }
    }
}

impl Iterator for BlockingDownload {
    type Item = Result<Bytes, DownloadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}

/// [`std::io::Read`] over a blocking download
pub struct BlockingReader {
    download: BlockingDownload,
    pending: Bytes,
}

impl BlockingReader {
    pub fn download(&self) -> &BlockingDownload {
        &self.download
    }
}

impl io::Read for BlockingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            match self.download.next_chunk() {
                None => return Ok(0),
                Some(Ok(chunk)) => self.pending = chunk,
                Some(Err(DownloadError::Io(e))) => return Err(e),
                Some(Err(e)) => return Err(io::Error::other(e)),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

fn build_runtime() -> Result<Runtime, DownloadError> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}
