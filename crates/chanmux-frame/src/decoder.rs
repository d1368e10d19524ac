use bytes::BytesMut;

use crate::codec::{decode_frame, FrameConfig};
use crate::error::Result;
use crate::message::{parse_message, Message};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Incremental message decoder for non-blocking input.
///
/// Bytes are fed in whatever chunks the transport produced; complete messages
/// come out in order. Partial frames stay buffered until the rest arrives.
#[derive(Debug)]
pub struct MessageDecoder {
    buf: BytesMut,
    config: FrameConfig,
}

impl MessageDecoder {
    /// Create a new decoder with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a new decoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Append raw bytes received from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decode the next complete message.
    ///
    /// Returns `Ok(None)` when more input is needed. A malformed payload
    /// yields an error but its frame is consumed, so decoding can continue;
    /// errors with [`is_desync`](crate::FrameError::is_desync) leave the
    /// buffer untouched and the decoder unusable.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match decode_frame(&mut self.buf, self.config.max_payload_size)? {
            Some(payload) => parse_message(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}
