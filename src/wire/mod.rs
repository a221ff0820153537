// src/wire/mod.rs
// =============================================================================
// Node-to-node messaging.
//
// Submodules:
// - event: the four event kinds and their binary payload encoding
// - transport: length-prefixed frames, receiver loops and per-peer senders
// =============================================================================

mod event;
mod transport;

use thiserror::Error;

pub use event::Event;
pub use transport::{receive_loop, PeerLink};

#[cfg(test)]
pub(crate) use transport::read_event;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown event type {0}")]
    UnknownTag(i32),

    #[error("truncated field: wanted {wanted} bytes, {available} available")]
    Truncated { wanted: usize, available: usize },

    #[error("{0} unexpected bytes after the last field")]
    TrailingBytes(usize),

    #[error("field is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("socket error: {0}")]
    Io(String),
}

// Keep the io error as text so WireError stays comparable in tests
impl From<std::io::Error> for WireError {
    fn from(value: std::io::Error) -> Self {
        WireError::Io(value.to_string())
    }
}
