//! Download engine - the resumable stream and its parts
//!
//! - `cursor`: how far a logical download has been delivered
//! - `retry`: whether an interrupted segment may be resumed
//! - `stream`: the self-healing byte stream
//! - `blocking`: a synchronous facade over the stream

mod blocking;
mod cursor;
mod retry;
mod stream;

pub use blocking::*;
pub use cursor::*;
pub use retry::*;
pub use stream::*;
