use std::fmt;

use bytes::Bytes;

/// Which peer output stream an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPart {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamPart::Stdout => f.write_str("stdout"),
            StreamPart::Stderr => f.write_str("stderr"),
        }
    }
}

/// Something that happened on a channel's transport, queued for the loop
/// thread.
///
/// `Eof`, `Fault` and `Exited` are terminal: each I/O pump posts exactly one
/// of them as its last event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Data { part: StreamPart, data: Bytes },
    Eof { part: StreamPart },
    Fault { part: StreamPart, message: String },
    Exited { status: i32 },
}
