//! Multiplexed channels to processes, pseudo-terminals, sockets and the
//! host's stdio, with an optional request/response RPC layer.
//!
//! # Crate Structure
//!
//! - [`transport`]: channel kinds, stream endpoints, process/pty/socket constructors
//! - [`frame`]: length-prefixed framing of RPC messages
//! - [`rpc`]: request correlation, pending calls and dispatchers
//! - [`channel`]: the reference-counted registry and its event loop

/// Re-export transport types.
pub mod transport {
    pub use chanmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chanmux_frame::*;
}

/// Re-export RPC types.
pub mod rpc {
    pub use chanmux_rpc::*;
}

/// Re-export channel types.
pub mod channel {
    pub use chanmux_channel::*;
}

pub use chanmux_channel::{ChannelId, ChannelOptions, EventLoop, Registry};
