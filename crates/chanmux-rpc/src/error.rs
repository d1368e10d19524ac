use serde_json::Value;

/// Why an RPC call did not produce a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The channel closed before the response arrived.
    #[error("channel closed")]
    ChannelClosed,

    /// The peer answered with an error value.
    #[error("remote error: {0}")]
    Remote(Value),
}

/// Resolution delivered to a pending call.
pub type CallResult = std::result::Result<Value, CallError>;

/// Errors that can occur in RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The RPC layer is closed; no new messages may be sent.
    #[error("channel closed")]
    ChannelClosed,

    /// Frame encoding, decoding or I/O failed.
    #[error("frame error: {0}")]
    Frame(#[from] chanmux_frame::FrameError),

    /// No deferred peer request with this id is awaiting a reply.
    #[error("no deferred request with id {0}")]
    UnknownRequest(u64),
}

impl RpcError {
    /// Returns true if the error means the transport can no longer be used.
    pub fn is_transport_fault(&self) -> bool {
        match self {
            RpcError::Frame(err) => {
                err.is_desync()
                    || matches!(
                        err,
                        chanmux_frame::FrameError::Io(_) | chanmux_frame::FrameError::ConnectionClosed
                    )
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
