//! Resumio Core - Resumable Download Engine
//!
//! This crate turns a single HTTP GET into a byte stream that survives
//! mid-transfer network failures. An interrupted body is resumed with a
//! narrowed `Range` request pinned to the original `ETag`, so the caller never
//! sees duplicated, missing, or mixed-version bytes.
//!
//! ```no_run
//! use futures::StreamExt;
//! use resumio_core::{ReqwestTransport, ResumableStream};
//! use resumio_types::{ByteRange, DownloadSettings};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), resumio_core::DownloadError> {
//! let settings = DownloadSettings::default();
//! let transport = Arc::new(ReqwestTransport::new("https://example.com/big.iso", &settings)?);
//! let mut stream = ResumableStream::open(transport, ByteRange::full(), &settings).await?;
//! while let Some(chunk) = stream.next().await {
//!     let chunk = chunk?;
//!     println!("{} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod transport;

pub use engine::*;
pub use error::*;
pub use transport::*;

pub use resumio_types::{ByteRange, DownloadEvent, DownloadSettings};
