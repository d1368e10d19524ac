//! Channel kinds and the pure stream-slot mapping behind endpoint selection.

use std::fmt;

/// The category of transport backing a channel. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Child process with piped stdio.
    Process,
    /// Child process attached to a pseudo-terminal.
    Pty,
    /// A single bidirectional socket.
    Socket,
    /// The host process's own stdin/stdout.
    Stdio,
    /// In-process loopback peer with no byte stream.
    Internal,
}

impl ChannelKind {
    /// Every kind, in declaration order.
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::Process,
        ChannelKind::Pty,
        ChannelKind::Socket,
        ChannelKind::Stdio,
        ChannelKind::Internal,
    ];

    /// Stable lowercase name used in logs and channel info.
    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Process => "process",
            ChannelKind::Pty => "pty",
            ChannelKind::Socket => "socket",
            ChannelKind::Stdio => "stdio",
            ChannelKind::Internal => "internal",
        }
    }

    /// Returns true if the kind is backed by a child process.
    pub fn is_process(self) -> bool {
        matches!(self, ChannelKind::Process | ChannelKind::Pty)
    }

    /// Returns true if the kind has byte-stream endpoints at all.
    pub fn has_streams(self) -> bool {
        !matches!(self, ChannelKind::Internal)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names a stream inside a transport payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSlot {
    /// What the child writes (its stdout, or the pty master read side).
    ProcessStdout,
    /// What the child reads (its stdin, or the pty master write side).
    ProcessStdin,
    /// The socket itself.
    Socket,
    /// Data flowing from the host into this process.
    StdioFromHost,
    /// Data flowing from this process out to the host.
    StdioToHost,
}

/// Slot the channel reads peer output from.
///
/// # Panics
///
/// Panics for [`ChannelKind::Internal`]: loopback channels have no streams and
/// callers must special-case them.
pub fn input_slot(kind: ChannelKind) -> StreamSlot {
    match kind {
        ChannelKind::Process | ChannelKind::Pty => StreamSlot::ProcessStdout,
        ChannelKind::Socket => StreamSlot::Socket,
        ChannelKind::Stdio => StreamSlot::StdioFromHost,
        ChannelKind::Internal => panic!("internal channels have no input stream"),
    }
}

/// Slot the channel writes to.
///
/// # Panics
///
/// Panics for [`ChannelKind::Internal`].
pub fn output_slot(kind: ChannelKind) -> StreamSlot {
    match kind {
        ChannelKind::Process | ChannelKind::Pty => StreamSlot::ProcessStdin,
        ChannelKind::Socket => StreamSlot::Socket,
        ChannelKind::Stdio => StreamSlot::StdioToHost,
        ChannelKind::Internal => panic!("internal channels have no output stream"),
    }
}
