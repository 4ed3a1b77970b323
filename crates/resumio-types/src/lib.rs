//! Shared types for Resumio
//!
//! This crate contains the plain data structures shared between
//! the core engine and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Range Types
// ============================================================================

/// A logical byte range of a remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte of the range
    pub start: u64,
    /// Number of bytes to read (None = to end of object)
    pub count: Option<u64>,
}

impl ByteRange {
    /// The whole object
    pub fn full() -> Self {
        Self { start: 0, count: None }
    }

    /// Everything from `start` to the end of the object
    pub fn from_offset(start: u64) -> Self {
        Self { start, count: None }
    }

    /// Exactly `count` bytes starting at `start`
    pub fn segment(start: u64, count: u64) -> Self {
        Self {
            start,
            count: Some(count),
        }
    }

    /// Whether this range selects nothing
    pub fn is_empty(&self) -> bool {
        self.count == Some(0)
    }

    /// Whether this range covers the whole object (`bytes=0-`)
    pub fn is_whole_object(&self) -> bool {
        self.start == 0 && self.count.is_none()
    }

    /// Last byte of the range, if bounded and non-empty
    pub fn end_inclusive(&self) -> Option<u64> {
        match self.count {
            Some(0) | None => None,
            Some(count) => Some(self.start.saturating_add(count - 1)),
        }
    }

    /// Render as an HTTP `Range` header value.
    /// Returns None for an empty range, which has no valid rendering.
    pub fn to_header(&self) -> Option<String> {
        match self.count {
            Some(0) => None,
            Some(_) => self
                .end_inclusive()
                .map(|end| format!("bytes={}-{}", self.start, end)),
            None => Some(format!("bytes={}-", self.start)),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.count {
            Some(count) => write!(f, "{}+{}", self.start, count),
            None => write!(f, "{}-", self.start),
        }
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Download settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Maximum number of resumptions per download (0 = resumption disabled)
    pub max_retries: u32,
    /// Base delay in milliseconds before a resumption, doubled per attempt
    pub retry_delay_ms: u64,
    /// Connect timeout in seconds for the HTTP transport
    pub connect_timeout_secs: Option<u64>,
    /// User agent sent by the HTTP transport
    pub user_agent: Option<String>,
}

impl DownloadSettings {
    /// Settings with the given retry budget and no backoff delay
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay_ms: 0,
            ..Self::default()
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 250,
            connect_timeout_secs: Some(30),
            user_agent: None,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by a resumable download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    Started {
        id: Uuid,
        offset: u64,
        remaining: Option<u64>,
        version: String,
        total_size: Option<u64>,
    },
    Progress {
        id: Uuid,
        offset: u64,
        remaining: Option<u64>,
    },
    Resuming {
        id: Uuid,
        attempt: u32,
        offset: u64,
        error: String,
    },
    Completed {
        id: Uuid,
        offset: u64,
    },
    Failed {
        id: Uuid,
        error: String,
    },
    Cancelled {
        id: Uuid,
        offset: u64,
    },
}

impl DownloadEvent {
    /// The download this event belongs to
    pub fn id(&self) -> Uuid {
        match self {
            DownloadEvent::Started { id, .. }
            | DownloadEvent::Progress { id, .. }
            | DownloadEvent::Resuming { id, .. }
            | DownloadEvent::Completed { id, .. }
            | DownloadEvent::Failed { id, .. }
            | DownloadEvent::Cancelled { id, .. } => *id,
        }
    }

    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadEvent::Completed { .. }
                | DownloadEvent::Failed { .. }
                | DownloadEvent::Cancelled { .. }
        )
    }
}
