//! Reference-counted multiplexed channels.
//!
//! A [`Registry`] owns every channel. Each channel wraps one transport
//! (piped process, pty process, socket, host stdio or in-process loopback),
//! two [`OutputReader`]s for the peer's stdout and stderr, optional RPC state
//! and an exit slot that is written once.
//!
//! The [`EventLoop`] runs blocking I/O on pump threads and applies the
//! resulting [`ChannelEvent`]s on a single thread, in arrival order per
//! channel. Callbacks never receive the registry; releases requested from a
//! callback go through [`DeferredReleases`].

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod reader;
pub mod registry;
pub mod terminal;

pub use channel::{Channel, ChannelId, ChannelInfo, Mode, Part, ABANDONED};
pub use config::{ChannelOptions, DEFAULT_READ_CHUNK};
pub use error::{ChannelError, Result};
pub use event::{ChannelEvent, StreamPart};
pub use event_loop::{EventLoop, EventSender};
pub use reader::{Consumer, OutputReader};
pub use registry::{DeferredReleases, Registry};
pub use terminal::Terminal;
