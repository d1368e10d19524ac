use chanmux_transport::ChannelKind;

use crate::channel::{ChannelId, Part};

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No live channel has this id.
    #[error("channel {0} not found")]
    NotFound(ChannelId),

    /// The stream or RPC layer needed by the operation is closed.
    #[error("channel {0} is closed")]
    Closed(ChannelId),

    /// The channel kind has no such part, or the part cannot be closed alone.
    #[error("invalid part '{part}' for {kind} channel")]
    InvalidPart { part: Part, kind: ChannelKind },

    /// Raw bytes would corrupt the RPC framing.
    #[error("channel {0} carries rpc; raw writes are not allowed")]
    RawSendOnRpc(ChannelId),

    /// The operation needs an RPC-capable channel.
    #[error("channel {0} is not rpc-capable")]
    NotRpc(ChannelId),

    /// Loopback channels have no byte transport.
    #[error("channel {0} has no byte transport")]
    NoTransport(ChannelId),

    /// The operation does not apply to this channel kind.
    #[error("cannot {op} a {kind} channel")]
    WrongKind { op: &'static str, kind: ChannelKind },

    /// Only one channel may own the host's standard streams.
    #[error("stdio is already in use by channel {0}")]
    StdioInUse(ChannelId),

    #[error("transport error: {0}")]
    Transport(#[from] chanmux_transport::TransportError),

    #[error("rpc error: {0}")]
    Rpc(#[from] chanmux_rpc::RpcError),

    #[error("frame error: {0}")]
    Frame(#[from] chanmux_frame::FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
