use crate::kind::{input_slot, output_slot, ChannelKind, StreamSlot};
use crate::process::{ChildHandle, ProcessStreams};
use crate::pty::PtyStreams;
use crate::socket::SocketStream;
use crate::stream::Stream;

/// The host process's own standard streams, viewed as a channel transport.
pub struct StdioPair {
    from_host: Stream,
    to_host: Stream,
}

impl StdioPair {
    pub fn new(from_host: Stream, to_host: Stream) -> Self {
        Self { from_host, to_host }
    }

    /// Wrap this process's stdin (from host) and stdout (to host).
    pub fn host() -> Self {
        Self::new(
            Stream::reader("stdin", std::io::stdin()),
            Stream::writer("stdout", std::io::stdout()),
        )
    }
}

/// Transport payload of a channel. The variant always matches the channel's
/// [`ChannelKind`].
pub enum Transport {
    Process(ProcessStreams),
    Pty(PtyStreams),
    Socket(Stream),
    Stdio(StdioPair),
    Internal,
}

impl Transport {
    /// Socket transport over a connected stream.
    pub fn socket(stream: SocketStream) -> Self {
        Transport::Socket(Stream::socket("socket", stream))
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Transport::Process(_) => ChannelKind::Process,
            Transport::Pty(_) => ChannelKind::Pty,
            Transport::Socket(_) => ChannelKind::Socket,
            Transport::Stdio(_) => ChannelKind::Stdio,
            Transport::Internal => ChannelKind::Internal,
        }
    }

    /// Endpoint carrying what the peer produces.
    ///
    /// # Panics
    ///
    /// Panics for internal channels.
    pub fn instream(&mut self) -> &mut Stream {
        let slot = input_slot(self.kind());
        self.slot_mut(slot)
    }

    /// Endpoint carrying what the peer consumes.
    ///
    /// # Panics
    ///
    /// Panics for internal channels.
    pub fn outstream(&mut self) -> &mut Stream {
        let slot = output_slot(self.kind());
        self.slot_mut(slot)
    }

    /// The peer's error stream. Only piped processes have one.
    pub fn errstream(&mut self) -> Option<&mut Stream> {
        match self {
            Transport::Process(proc) => Some(&mut proc.stderr),
            _ => None,
        }
    }

    fn slot_mut(&mut self, slot: StreamSlot) -> &mut Stream {
        match (self, slot) {
            (Transport::Process(proc), StreamSlot::ProcessStdout) => &mut proc.stdout,
            (Transport::Process(proc), StreamSlot::ProcessStdin) => &mut proc.stdin,
            (Transport::Pty(pty), StreamSlot::ProcessStdout) => &mut pty.stdout,
            (Transport::Pty(pty), StreamSlot::ProcessStdin) => &mut pty.stdin,
            (Transport::Socket(stream), StreamSlot::Socket) => stream,
            (Transport::Stdio(pair), StreamSlot::StdioFromHost) => &mut pair.from_host,
            (Transport::Stdio(pair), StreamSlot::StdioToHost) => &mut pair.to_host,
            (transport, slot) => panic!(
                "transport variant {} has no {slot:?} stream",
                transport.kind()
            ),
        }
    }

    /// Pty payload accessor.
    ///
    /// # Panics
    ///
    /// Panics if the transport is not a pty.
    pub fn pty_mut(&mut self) -> &mut PtyStreams {
        match self {
            Transport::Pty(pty) => pty,
            other => panic!("expected pty transport, found {}", other.kind()),
        }
    }

    /// Process id of the peer for process and pty transports.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Transport::Process(proc) => Some(proc.pid()),
            Transport::Pty(pty) => Some(pty.pid()),
            _ => None,
        }
    }

    /// Child of a process or pty transport.
    pub fn child(&self) -> Option<&ChildHandle> {
        match self {
            Transport::Process(proc) => Some(proc.child()),
            Transport::Pty(pty) => Some(pty.child()),
            _ => None,
        }
    }

    /// Close every stream of the transport. Idempotent.
    pub fn close(&mut self) {
        match self {
            Transport::Process(proc) => {
                proc.stdin.close();
                proc.stdout.close();
                proc.stderr.close();
            }
            Transport::Pty(pty) => {
                pty.stdin.close();
                pty.stdout.close();
            }
            Transport::Socket(stream) => stream.close(),
            Transport::Stdio(pair) => {
                pair.from_host.close();
                pair.to_host.close();
            }
            Transport::Internal => {}
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Process(proc) => f.debug_tuple("Process").field(proc).finish(),
            Transport::Pty(pty) => f.debug_tuple("Pty").field(pty).finish(),
            Transport::Socket(stream) => f.debug_tuple("Socket").field(stream).finish(),
            Transport::Stdio(_) => f.write_str("Stdio"),
            Transport::Internal => f.write_str("Internal"),
        }
    }
}
