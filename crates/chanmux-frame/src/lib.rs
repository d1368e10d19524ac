//! Length-prefixed RPC message framing for chanmux channels.
//!
//! Every message is framed with:
//! - A 2-byte magic number ("CM") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! The payload is a msgpack-rpc shaped JSON array. Decoding is incremental:
//! feed whatever the transport produced and pull complete messages out.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod decoder;
pub mod error;
pub mod message;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::MessageCodec;
pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use decoder::MessageDecoder;
pub use error::{FrameError, Result};
pub use message::{encode_message, params_array, parse_message, Message};
pub use writer::FrameWriter;
