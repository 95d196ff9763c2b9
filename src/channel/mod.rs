//! The event channel between hook instances and the resident handler.
//!
//! Many short-lived writers, one persistent reader, one line per event.
//! Delivery is fire-and-forget: there is no acknowledgement path and nothing
//! is retried.

pub mod fifo;
pub mod lines;
pub mod memory;

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use fifo::{create_fifo, FifoReader, FifoWriter};
pub use lines::LineReader;
pub use memory::{memory_channel, MemorySource, MemoryWriter};

/// Channel error types
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("line is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("line contains an embedded newline")]
    EmbeddedNewline,

    #[error("line is not valid UTF-8 ({len} bytes)")]
    InvalidUtf8 { len: usize },

    #[error("channel is full, event dropped")]
    Full,

    #[error("channel is closed")]
    Closed,

    #[error("{0} exists and is not a FIFO")]
    NotAFifo(PathBuf),
}

impl ChannelError {
    /// Errors that only affect the current line; the reader can keep going
    pub fn is_line_local(&self) -> bool {
        matches!(
            self,
            ChannelError::TooLarge { .. } | ChannelError::InvalidUtf8 { .. }
        )
    }
}

/// Writer half, used by one hook invocation.
///
/// Each call is exactly one write of one newline-terminated line.
pub trait EventWriter: Send + Sync {
    fn send_line(&self, line: &str) -> Result<(), ChannelError>;
}

/// Reader half, owned by the handler
#[async_trait]
pub trait EventSource: Send {
    /// Next line without its newline; `Ok(None)` once the channel is closed for good.
    ///
    /// Cancel safe: a partially read line is kept for the next call.
    async fn next_line(&mut self) -> Result<Option<String>, ChannelError>;
}

/// Shared framing checks for writers; returns the bytes to write
pub(crate) fn frame_line(line: &str) -> Result<Vec<u8>, ChannelError> {
    if line.contains('\n') {
        return Err(ChannelError::EmbeddedNewline);
    }

    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');

    if buf.len() > crate::protocol::MAX_EVENT_LINE {
        return Err(ChannelError::TooLarge {
            size: buf.len(),
            limit: crate::protocol::MAX_EVENT_LINE,
        });
    }
    Ok(buf)
}
