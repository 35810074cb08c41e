use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while holding, transmitting or persisting a canvas.
///
/// Per-message variants (`Protocol`, `OutOfBounds`) are handled where they occur
/// and never terminate the server; only initialization failures are fatal.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed snapshot: expected {expected} bytes, got {actual}")]
    MalformedSnapshot { expected: usize, actual: usize },

    #[error("pixel ({row}, {col}) is outside the {width}x{height} canvas")]
    OutOfBounds {
        row: i16,
        col: i16,
        width: i16,
        height: i16,
    },

    #[error("no free peer slot")]
    CapacityExceeded,

    #[error("no snapshot received within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("corrupt canvas state: {0}")]
    CorruptState(String),

    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("invalid canvas dimensions {width}x{height}")]
    InvalidDimensions { width: i16, height: i16 },
}

impl From<bincode::Error> for SyncError {
    fn from(err: bincode::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
