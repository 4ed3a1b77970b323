//! Transport seam - issues one ranged, conditional GET
//!
//! The engine never talks HTTP itself. It hands a [`RangeRequest`] to a
//! [`Transport`] and receives a [`Segment`]: the version token, the total size
//! when known, and the body as a stream of chunks.

mod http;

pub use self::http::*;

use crate::error::DownloadError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use resumio_types::ByteRange;
use std::fmt;

/// A single fetch of part of an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub range: ByteRange,
    /// Exact-match version condition (`If-Match`)
    pub if_match: Option<String>,
}

impl RangeRequest {
    /// The first fetch of a download; no version is known yet
    pub fn initial(range: ByteRange) -> Self {
        Self {
            range,
            if_match: None,
        }
    }

    /// A fetch that must be served from `version` or fail
    pub fn conditional(range: ByteRange, version: String) -> Self {
        Self {
            range,
            if_match: Some(version),
        }
    }
}

/// The body of one HTTP response, plus the metadata the engine needs
pub struct Segment {
    /// Version token (ETag) of the object that served this body
    pub version: Option<String>,
    /// Size of the whole object, when the server reported it
    pub total_size: Option<u64>,
    /// Body chunks; read failures surface as [`DownloadError::Interrupted`]
    pub body: BoxStream<'static, Result<Bytes, DownloadError>>,
}

impl Segment {
    pub fn new(
        version: Option<String>,
        body: BoxStream<'static, Result<Bytes, DownloadError>>,
    ) -> Self {
        Self {
            version,
            total_size: None,
            body,
        }
    }

    pub fn with_total_size(mut self, total_size: Option<u64>) -> Self {
        self.total_size = total_size;
        self
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("version", &self.version)
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

/// Issues ranged, conditional GETs.
///
/// Implementations own timeouts and must reject a request whose `if_match`
/// no longer matches the object with [`DownloadError::VersionMismatch`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: &RangeRequest) -> Result<Segment, DownloadError>;
}
