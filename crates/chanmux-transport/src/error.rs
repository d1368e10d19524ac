use std::path::PathBuf;

/// Errors that can occur in channel transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Failed to start a child process.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// Pseudo-terminal setup or control failed.
    #[error("pty error: {0}")]
    Pty(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The read side of a stream was already handed to a reader.
    #[error("reader for stream '{0}' already taken")]
    ReaderTaken(&'static str),

    /// The stream does not support the requested direction or operation.
    #[error("stream '{stream}' does not support {op}")]
    Unsupported { stream: &'static str, op: &'static str },

    /// The stream has been closed.
    #[error("stream '{0}' closed")]
    Closed(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
