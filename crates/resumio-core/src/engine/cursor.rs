//! Transfer cursor - tracks how much of a logical range has been delivered
//!
//! The cursor is owned by exactly one stream. It advances only when a chunk
//! has been handed out, so a resumption always starts at the first byte the
//! consumer has not seen yet.

use crate::error::DownloadError;
use crate::transport::RangeRequest;
use resumio_types::ByteRange;
use tracing::error;

/// Progress through one logical download, pinned to one object version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCursor {
    offset: u64,
    remaining: Option<u64>,
    version: String,
}

impl TransferCursor {
    /// Create a cursor at the start of `range`, pinned to `version`
    pub fn new(range: ByteRange, version: impl Into<String>) -> Self {
        Self {
            offset: range.start,
            remaining: range.count,
            version: version.into(),
        }
    }

    /// Byte offset of the next undelivered byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes still expected (None = read to end of object)
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// The version token (ETag) this download is pinned to
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Whether a bounded range has been fully delivered
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Record `n` delivered bytes.
    ///
    /// Receiving more bytes than the range declared is a transport defect and
    /// is never retried.
    pub fn advance(&mut self, n: u64) -> Result<(), DownloadError> {
        if let Some(remaining) = self.remaining {
            if n > remaining {
                let message = format!(
                    "received {} bytes at offset {} but only {} remained in range",
                    n, self.offset, remaining
                );
                error!("{}", message);
                return Err(DownloadError::InvariantViolation(message));
            }
            self.remaining = Some(remaining - n);
        }

        self.offset = self.offset.checked_add(n).ok_or_else(|| {
            let message = format!("offset {} overflowed advancing by {}", self.offset, n);
            error!("{}", message);
            DownloadError::InvariantViolation(message)
        })?;

        Ok(())
    }

    /// The range still to be delivered
    pub fn range(&self) -> ByteRange {
        ByteRange {
            start: self.offset,
            count: self.remaining,
        }
    }

    /// Range header for the next fetch
    pub fn to_range_header(&self) -> Option<String> {
        self.range().to_header()
    }

    /// Exact-match condition on the pinned version
    pub fn to_conditional_header(&self) -> &str {
        &self.version
    }

    /// Build the narrowed, version-conditioned request that continues this download
    pub fn resume_request(&self) -> RangeRequest {
        RangeRequest::conditional(self.range(), self.version.clone())
    }
}
