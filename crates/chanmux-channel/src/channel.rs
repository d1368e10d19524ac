use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::rc::Weak;

use bytes::Bytes;
use chanmux_rpc::RpcState;
use chanmux_transport::{ChannelKind, Transport};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ChannelOptions;
use crate::error::{ChannelError, Result};
use crate::event::{ChannelEvent, StreamPart};
use crate::reader::OutputReader;
use crate::terminal::Terminal;

/// Exit status recorded when a channel ends without a real one: a fault, or
/// teardown before the peer terminated.
pub const ABANDONED: i32 = -1;

/// Stable identifier of a channel. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelId(pub(crate) u64);

impl ChannelId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Part of a channel that can be closed on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Part {
    Stdin,
    Stdout,
    Stderr,
    Rpc,
    All,
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Part::Stdin => "stdin",
            Part::Stdout => "stdout",
            Part::Stderr => "stderr",
            Part::Rpc => "rpc",
            Part::All => "all",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Part {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stdin" => Ok(Part::Stdin),
            "stdout" => Ok(Part::Stdout),
            "stderr" => Ok(Part::Stderr),
            "rpc" => Ok(Part::Rpc),
            "all" | "" => Ok(Part::All),
            other => Err(format!("unknown channel part '{other}'")),
        }
    }
}

/// How the channel's input is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Bytes,
    Rpc,
    Terminal,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bytes => f.write_str("bytes"),
            Mode::Rpc => f.write_str("rpc"),
            Mode::Terminal => f.write_str("terminal"),
        }
    }
}

/// Snapshot of a channel for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub kind: &'static str,
    pub mode: Mode,
    pub pty: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub refcount: usize,
    pub pending_calls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
}

pub(crate) type ExitCallback = Box<dyn FnOnce(ChannelId, i32)>;

/// One multiplexed channel: a transport, its output readers, optional RPC
/// state and the exit slot.
///
/// Channels live inside a [`Registry`](crate::Registry) and are only reachable
/// through it.
pub struct Channel {
    id: ChannelId,
    pub(crate) refcount: usize,
    /// References held by I/O pump threads, released by their terminal events.
    pub(crate) io_refs: usize,
    pub(crate) transport: Transport,
    pub(crate) rpc: Option<RpcState>,
    pub(crate) stdout: OutputReader,
    pub(crate) stderr: OutputReader,
    pub(crate) on_exit: Option<ExitCallback>,
    exit_fired: bool,
    pub(crate) terminal: Option<Weak<RefCell<dyn Terminal>>>,
    exit_status: Option<i32>,
    pub(crate) events: VecDeque<ChannelEvent>,
    /// Outgoing bytes of a loopback channel.
    pub(crate) loopback: Vec<u8>,
    pub(crate) read_chunk_size: usize,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, transport: Transport, options: ChannelOptions) -> Self {
        Self {
            id,
            refcount: 1,
            io_refs: 0,
            transport,
            rpc: options.rpc.then(|| RpcState::new(options.rpc_config)),
            stdout: OutputReader::new(options.stdout_buffered),
            stderr: OutputReader::new(options.stderr_buffered),
            on_exit: None,
            exit_fired: false,
            terminal: None,
            exit_status: None,
            events: VecDeque::new(),
            loopback: Vec::new(),
            read_chunk_size: options.read_chunk_size,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.transport.kind()
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn is_rpc(&self) -> bool {
        self.rpc.is_some()
    }

    pub fn rpc(&self) -> Option<&RpcState> {
        self.rpc.as_ref()
    }

    /// `None` until the peer has terminated.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn pid(&self) -> Option<u32> {
        self.transport.pid()
    }

    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn queued_events(&self) -> usize {
        self.events.len()
    }

    pub fn info(&self) -> ChannelInfo {
        let mode = if self.rpc.is_some() {
            Mode::Rpc
        } else if self.terminal.is_some() {
            Mode::Terminal
        } else {
            Mode::Bytes
        };
        ChannelInfo {
            id: self.id,
            kind: self.kind().name(),
            mode,
            pty: self.kind() == ChannelKind::Pty,
            pid: self.pid(),
            refcount: self.refcount,
            pending_calls: self.rpc.as_ref().map_or(0, RpcState::pending_count),
            exit_status: self.exit_status,
        }
    }

    pub(crate) fn reader_mut(&mut self, part: StreamPart) -> &mut OutputReader {
        match part {
            StreamPart::Stdout => &mut self.stdout,
            StreamPart::Stderr => &mut self.stderr,
        }
    }

    /// Writes raw bytes to the peer.
    pub(crate) fn write_raw(&mut self, data: &[u8]) -> Result<usize> {
        if self.rpc.is_some() {
            return Err(ChannelError::RawSendOnRpc(self.id));
        }
        if self.kind() == ChannelKind::Internal {
            return Err(ChannelError::NoTransport(self.id));
        }
        let out = self.transport.outstream();
        if out.is_closed() {
            return Err(ChannelError::Closed(self.id));
        }
        out.write_all(data)?;
        out.flush()?;
        Ok(data.len())
    }

    /// Run `f` with the RPC state and the stream its frames are written to.
    ///
    /// A transport fault reported by `f` is a close signal for the channel.
    pub(crate) fn with_rpc<T>(
        &mut self,
        f: impl FnOnce(&mut RpcState, &mut dyn Write) -> chanmux_rpc::Result<T>,
    ) -> Result<T> {
        let id = self.id;
        let Channel {
            rpc,
            transport,
            loopback,
            ..
        } = &mut *self;
        let rpc = rpc.as_mut().ok_or(ChannelError::NotRpc(id))?;
        let out: &mut dyn Write = match transport {
            Transport::Internal => loopback,
            transport => transport.outstream(),
        };
        match f(rpc, out) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_transport_fault() {
                    self.on_transport_fault(StreamPart::Stdout, &err.to_string());
                }
                Err(err.into())
            }
        }
    }

    /// Apply one queued event. Returns true if the event ends an I/O pump
    /// and its channel reference must be released.
    pub(crate) fn handle_event(&mut self, event: ChannelEvent) -> bool {
        match event {
            ChannelEvent::Data { part, data } => {
                self.on_data(part, data);
                false
            }
            ChannelEvent::Eof { part } => {
                debug!(channel = %self.id, %part, "stream ended");
                self.reader_mut(part).close();
                if part == StreamPart::Stdout {
                    if let Some(rpc) = self.rpc.as_mut() {
                        rpc.on_transport_closed();
                    }
                    if !self.kind().is_process() {
                        self.handle_exit(0);
                    }
                }
                self.release_io_ref()
            }
            ChannelEvent::Fault { part, message } => {
                self.on_transport_fault(part, &message);
                self.release_io_ref()
            }
            ChannelEvent::Exited { status } => {
                self.handle_exit(status);
                self.release_io_ref()
            }
        }
    }

    fn release_io_ref(&mut self) -> bool {
        if self.io_refs == 0 {
            return false;
        }
        self.io_refs -= 1;
        true
    }

    pub(crate) fn on_data(&mut self, part: StreamPart, data: Bytes) {
        if part == StreamPart::Stderr {
            self.stderr.feed(&data);
            return;
        }

        if self.rpc.is_some() {
            let result = self.with_rpc(|rpc, out| rpc.receive(&data, out));
            if let Err(err) = result {
                warn!(channel = %self.id, error = %err, "rpc input failed");
            }
            return;
        }

        if let Some(terminal) = self.terminal.as_ref().and_then(Weak::upgrade) {
            terminal.borrow_mut().receive(&data);
        }
        self.stdout.feed(&data);
    }

    /// An I/O error on the transport. Closes the transport and, for peers
    /// without a process exit of their own, ends the channel.
    fn on_transport_fault(&mut self, part: StreamPart, message: &str) {
        warn!(channel = %self.id, %part, error = message, "transport fault");
        self.reader_mut(part).close();
        if part == StreamPart::Stdout {
            if let Some(rpc) = self.rpc.as_mut() {
                rpc.on_transport_closed();
            }
            self.transport.close();
            if !self.kind().is_process() {
                self.handle_exit(ABANDONED);
            }
        }
    }

    /// Record that the peer terminated. Only the first call has any effect.
    pub(crate) fn handle_exit(&mut self, status: i32) {
        if self.exit_status.is_some() {
            debug!(channel = %self.id, status, "duplicate exit ignored");
            return;
        }
        self.exit_status = Some(status);
        info!(channel = %self.id, kind = %self.kind(), status, "channel exited");

        self.stdout.close();
        self.stderr.close();
        if let Some(rpc) = self.rpc.as_mut() {
            rpc.on_transport_closed();
        }
        if let Some(terminal) = self.terminal.as_ref().and_then(Weak::upgrade) {
            terminal.borrow_mut().channel_exited(self.id, status);
        }
        self.fire_exit(status);
    }

    fn fire_exit(&mut self, status: i32) {
        if self.exit_fired {
            return;
        }
        self.exit_fired = true;
        if let Some(on_exit) = self.on_exit.take() {
            on_exit(self.id, status);
        }
    }

    /// Final cleanup once the last reference is gone.
    pub(crate) fn teardown(&mut self) {
        debug!(channel = %self.id, kind = %self.kind(), "tearing down channel");
        self.transport.close();

        if self.exit_status.is_none() {
            if let Some(child) = self.transport.child() {
                if let Err(err) = child.kill_and_reap() {
                    warn!(channel = %self.id, pid = child.pid(), error = %err, "failed to reap process");
                }
            }
        }

        if let Some(rpc) = self.rpc.as_mut() {
            rpc.on_transport_closed();
        }
        self.stdout.close();
        self.stderr.close();
        self.fire_exit(self.exit_status.unwrap_or(ABANDONED));
        self.terminal = None;
        self.events.clear();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("refcount", &self.refcount)
            .field("rpc", &self.rpc)
            .field("exit_status", &self.exit_status)
            .field("queued", &self.events.len())
            .finish()
    }
}
