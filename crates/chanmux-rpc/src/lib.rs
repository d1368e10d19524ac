//! Request/response correlation for chanmux channels.
//!
//! [`RpcState`] sits between a channel's transport and its users. Outgoing
//! requests get monotonically increasing ids and a [`PendingCall`] handle;
//! incoming responses resolve the matching handle regardless of order.
//! Requests and notifications from the peer go to a [`Dispatcher`].
//!
//! When the transport closes, every pending call resolves with
//! [`CallError::ChannelClosed`] exactly once.

pub mod dispatch;
pub mod error;
pub mod pending;
pub mod state;

pub use dispatch::{Dispatcher, MethodTable, Reply};
pub use error::{CallError, CallResult, Result, RpcError};
pub use pending::PendingCall;
pub use state::{RpcConfig, RpcState};
