//! Transport variants and stream endpoint selection for chanmux channels.
//!
//! A channel talks to exactly one kind of peer:
//! - a child process with piped stdio
//! - a child process on a pseudo-terminal
//! - a socket (Unix domain or TCP)
//! - the host process's own stdin/stdout
//! - an in-process loopback peer with no streams
//!
//! This is the lowest layer of chanmux. [`Transport`] holds the payload for
//! the active kind and resolves which [`Stream`] is read and which is written.

pub mod error;
pub mod kind;
pub mod process;
pub mod pty;
pub mod socket;
pub mod stream;
pub mod transport;

pub use error::{Result, TransportError};
pub use kind::{input_slot, output_slot, ChannelKind, StreamSlot};
pub use process::{exit_code, ChildHandle, ProcessSpawner, ProcessStreams};
pub use pty::{PtySize, PtyStreams};
pub use socket::SocketStream;
#[cfg(unix)]
pub use socket::UnixSocketListener;
pub use stream::Stream;
pub use transport::{StdioPair, Transport};
