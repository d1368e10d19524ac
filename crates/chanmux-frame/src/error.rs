/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x434d \"CM\")")]
    InvalidMagic,

    /// An incoming frame announces a payload above the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An outgoing message was refused before any byte was written.
    #[error("message too large to send ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The frame was delimited correctly but its payload is not a valid message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The payload is not valid JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Returns true if the byte stream can no longer be split into frames.
    ///
    /// Malformed payloads only lose the offending frame; a bad header loses
    /// synchronization with the peer for good. Refusing an outgoing message
    /// leaves the stream untouched.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
