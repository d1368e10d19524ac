use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bytes::Bytes;
use chanmux_rpc::{Dispatcher, PendingCall};
use chanmux_transport::{
    ChannelKind, ProcessSpawner, PtySize, SocketStream, StdioPair, Transport,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelId, ChannelInfo, Part};
use crate::config::ChannelOptions;
use crate::error::{ChannelError, Result};
use crate::event::{ChannelEvent, StreamPart};
use crate::terminal::Terminal;

/// Releases requested from callbacks, applied at the start of the next
/// [`Registry::process_events`].
///
/// Callbacks run while the registry is busy and cannot release channels
/// directly. Clone this handle into them instead.
#[derive(Debug, Clone, Default)]
pub struct DeferredReleases {
    queue: Rc<RefCell<Vec<ChannelId>>>,
}

impl DeferredReleases {
    pub fn release(&self, id: ChannelId) {
        self.queue.borrow_mut().push(id);
    }

    fn drain(&self) -> Vec<ChannelId> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }
}

/// Owns every channel and enforces the reference-counting lifecycle.
///
/// A channel is created with one reference held by the caller. It stays
/// reachable until the last matching [`release`](Registry::release), which
/// tears it down and removes it. Ids are never recycled.
///
/// The registry is single-threaded. I/O threads talk to it through the
/// [`EventLoop`](crate::EventLoop).
pub struct Registry {
    channels: HashMap<ChannelId, Channel>,
    next_id: u64,
    ready: VecDeque<ChannelId>,
    deferred: DeferredReleases,
    tearing_down: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            next_id: 1,
            ready: VecDeque::new(),
            deferred: DeferredReleases::default(),
            tearing_down: false,
        }
    }

    /// Register a channel over `transport` with refcount 1.
    ///
    /// Fails only when a second channel would take over the host's stdio.
    pub fn create(&mut self, transport: Transport, options: ChannelOptions) -> Result<ChannelId> {
        let kind = transport.kind();
        if kind == ChannelKind::Stdio {
            if let Some(existing) = self
                .channels
                .values()
                .find(|c| c.kind() == ChannelKind::Stdio)
            {
                return Err(ChannelError::StdioInUse(existing.id()));
            }
        }

        let id = ChannelId(self.next_id);
        self.next_id += 1;
        let rpc = options.rpc;
        self.channels.insert(id, Channel::new(id, transport, options));
        info!(channel = %id, %kind, rpc, "channel created");
        Ok(id)
    }

    /// Spawn a child with piped stdio.
    pub fn spawn(&mut self, spawner: &ProcessSpawner, options: ChannelOptions) -> Result<ChannelId> {
        let streams = spawner.spawn()?;
        self.create(Transport::Process(streams), options)
    }

    /// Spawn a child on a new pseudo-terminal.
    pub fn spawn_pty(
        &mut self,
        spawner: &ProcessSpawner,
        size: PtySize,
        options: ChannelOptions,
    ) -> Result<ChannelId> {
        let streams = spawner.spawn_pty(size)?;
        self.create(Transport::Pty(streams), options)
    }

    pub fn open_socket(&mut self, socket: SocketStream, options: ChannelOptions) -> Result<ChannelId> {
        self.create(Transport::socket(socket), options)
    }

    /// Channel over this process's own stdin and stdout.
    pub fn open_stdio(&mut self, options: ChannelOptions) -> Result<ChannelId> {
        self.create(Transport::Stdio(StdioPair::host()), options)
    }

    /// In-process loopback channel.
    pub fn open_internal(&mut self, options: ChannelOptions) -> Result<ChannelId> {
        self.create(Transport::Internal, options)
    }

    pub fn lookup(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn get_mut(&mut self, id: ChannelId) -> Result<&mut Channel> {
        self.channels.get_mut(&id).ok_or(ChannelError::NotFound(id))
    }

    /// Take one more reference. Returns the new count.
    pub fn retain(&mut self, id: ChannelId) -> Result<usize> {
        let channel = self.get_mut(id)?;
        channel.refcount += 1;
        Ok(channel.refcount)
    }

    /// Drop one reference. At zero the channel is torn down and removed.
    /// Returns the remaining count.
    ///
    /// # Panics
    ///
    /// Panics when releasing a channel that was already freed, or when called
    /// from inside a teardown.
    pub fn release(&mut self, id: ChannelId) -> Result<usize> {
        assert!(
            !self.tearing_down,
            "release of channel {id} during teardown; use DeferredReleases"
        );

        let Some(channel) = self.channels.get_mut(&id) else {
            if id.0 < self.next_id {
                panic!("channel {id} released more times than it was retained");
            }
            return Err(ChannelError::NotFound(id));
        };

        channel.refcount -= 1;
        let remaining = channel.refcount;
        if remaining > 0 {
            return Ok(remaining);
        }

        if let Some(mut channel) = self.channels.remove(&id) {
            self.ready.retain(|ready| *ready != id);
            self.tearing_down = true;
            channel.teardown();
            self.tearing_down = false;
            debug!(channel = %id, "channel freed");
        }
        Ok(0)
    }

    /// Handle for releasing channels from inside callbacks.
    pub fn deferred_releases(&self) -> DeferredReleases {
        self.deferred.clone()
    }

    /// Write raw bytes to the peer.
    pub fn send(&mut self, id: ChannelId, data: &[u8]) -> Result<usize> {
        self.get_mut(id)?.write_raw(data)
    }

    /// Send an RPC request. The handle resolves when the response arrives or
    /// the channel closes.
    pub fn send_request(&mut self, id: ChannelId, method: &str, params: Value) -> Result<PendingCall> {
        self.get_mut(id)?
            .with_rpc(|rpc, out| rpc.send_request(out, method, params))
    }

    pub fn send_notification(&mut self, id: ChannelId, method: &str, params: Value) -> Result<()> {
        self.get_mut(id)?
            .with_rpc(|rpc, out| rpc.send_notification(out, method, params))
    }

    /// Answer a peer request whose dispatcher deferred its reply.
    pub fn respond(
        &mut self,
        id: ChannelId,
        request_id: u64,
        outcome: std::result::Result<Value, Value>,
    ) -> Result<()> {
        self.get_mut(id)?
            .with_rpc(|rpc, out| rpc.respond(out, request_id, outcome))
    }

    /// Install the handler for requests and notifications from the peer.
    pub fn set_dispatcher(
        &mut self,
        id: ChannelId,
        dispatcher: impl Dispatcher + 'static,
    ) -> Result<()> {
        let channel = self.get_mut(id)?;
        let rpc = channel.rpc.as_mut().ok_or(ChannelError::NotRpc(id))?;
        rpc.set_dispatcher(dispatcher);
        Ok(())
    }

    pub fn on_stdout(&mut self, id: ChannelId, consumer: impl FnMut(&[u8]) + 'static) -> Result<()> {
        self.get_mut(id)?.stdout.set_consumer(consumer);
        Ok(())
    }

    pub fn on_stderr(&mut self, id: ChannelId, consumer: impl FnMut(&[u8]) + 'static) -> Result<()> {
        self.get_mut(id)?.stderr.set_consumer(consumer);
        Ok(())
    }

    /// Register the exit callback. It fires exactly once, with the peer's
    /// status or [`ABANDONED`](crate::ABANDONED).
    pub fn on_exit(
        &mut self,
        id: ChannelId,
        callback: impl FnOnce(ChannelId, i32) + 'static,
    ) -> Result<()> {
        self.get_mut(id)?.on_exit = Some(Box::new(callback));
        Ok(())
    }

    /// Attach a terminal view. The attachment holds one channel reference
    /// until [`detach_terminal`](Registry::detach_terminal).
    pub fn attach_terminal<T: Terminal + 'static>(
        &mut self,
        id: ChannelId,
        terminal: &Rc<RefCell<T>>,
    ) -> Result<()> {
        let channel = self.get_mut(id)?;
        let had_terminal = channel.terminal.is_some();
        let terminal: Rc<RefCell<dyn Terminal>> = terminal.clone();
        channel.terminal = Some(Rc::downgrade(&terminal));
        if !had_terminal {
            channel.refcount += 1;
        }
        debug!(channel = %id, "terminal attached");
        Ok(())
    }

    /// Detach the terminal, if any, and drop its reference.
    pub fn detach_terminal(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.get_mut(id)?;
        if channel.terminal.take().is_none() {
            return Ok(());
        }
        debug!(channel = %id, "terminal detached");
        self.release(id).map(|_| ())
    }

    /// Close one part of the channel.
    pub fn close_part(&mut self, id: ChannelId, part: Part) -> Result<()> {
        let channel = self.get_mut(id)?;
        let kind = channel.kind();
        let invalid = || ChannelError::InvalidPart { part, kind };

        match part {
            Part::Stdin => {
                if channel.is_rpc() || !kind.has_streams() || kind == ChannelKind::Socket {
                    return Err(invalid());
                }
                channel.transport.outstream().close();
            }
            Part::Stdout => {
                if channel.is_rpc() || !kind.has_streams() {
                    return Err(invalid());
                }
                channel.transport.instream().close();
                channel.stdout.close();
            }
            Part::Stderr => {
                let Some(stream) = channel.transport.errstream() else {
                    return Err(invalid());
                };
                stream.close();
                channel.stderr.close();
            }
            Part::Rpc => {
                let Some(rpc) = channel.rpc.as_mut() else {
                    return Err(invalid());
                };
                rpc.on_transport_closed();
                channel.transport.close();
            }
            Part::All => {
                if let Some(rpc) = channel.rpc.as_mut() {
                    rpc.on_transport_closed();
                }
                channel.transport.close();
                channel.stdout.close();
                channel.stderr.close();
            }
        }
        debug!(channel = %id, %part, "channel part closed");
        Ok(())
    }

    /// Ask a process peer to terminate (SIGTERM). The exit arrives through
    /// the normal event path.
    pub fn stop(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.get_mut(id)?;
        let kind = channel.kind();
        let child = channel
            .transport
            .child()
            .ok_or(ChannelError::WrongKind { op: "stop", kind })?;
        if channel.exit_status().is_some() {
            return Ok(());
        }
        if !child.terminate()? {
            debug!(channel = %id, "process already reaped");
        }
        Ok(())
    }

    /// Resize the pseudo-terminal of a pty channel.
    pub fn resize_pty(&mut self, id: ChannelId, width: u16, height: u16) -> Result<()> {
        let channel = self.get_mut(id)?;
        let kind = channel.kind();
        if kind != ChannelKind::Pty {
            return Err(ChannelError::WrongKind { op: "resize", kind });
        }
        channel.transport.pty_mut().resize(PtySize {
            rows: height,
            cols: width,
        })?;
        Ok(())
    }

    pub fn info(&self, id: ChannelId) -> Result<ChannelInfo> {
        self.lookup(id)
            .map(Channel::info)
            .ok_or(ChannelError::NotFound(id))
    }

    /// Snapshot of every live channel, ordered by id.
    pub fn list(&self) -> Vec<ChannelInfo> {
        let mut infos: Vec<_> = self.channels.values().map(Channel::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// `None` until the peer has terminated.
    pub fn exit_status(&self, id: ChannelId) -> Result<Option<i32>> {
        self.info(id).map(|info| info.exit_status)
    }

    /// Take output a buffered reader kept because nobody consumed it.
    pub fn take_output(&mut self, id: ChannelId, part: StreamPart) -> Result<Bytes> {
        Ok(self.get_mut(id)?.reader_mut(part).take_buffer())
    }

    /// Feed bytes into a loopback channel as if its peer had written them.
    pub fn deliver(&mut self, id: ChannelId, data: &[u8]) -> Result<()> {
        let channel = self.get_mut(id)?;
        let kind = channel.kind();
        if kind != ChannelKind::Internal {
            return Err(ChannelError::WrongKind { op: "deliver to", kind });
        }
        channel.on_data(StreamPart::Stdout, Bytes::copy_from_slice(data));
        Ok(())
    }

    /// Take what a loopback channel has written to its peer.
    pub fn take_loopback(&mut self, id: ChannelId) -> Result<Vec<u8>> {
        let channel = self.get_mut(id)?;
        let kind = channel.kind();
        if kind != ChannelKind::Internal {
            return Err(ChannelError::WrongKind { op: "drain", kind });
        }
        Ok(std::mem::take(&mut channel.loopback))
    }

    /// Queue an event for the channel. Events for freed channels are dropped.
    pub fn enqueue(&mut self, id: ChannelId, event: ChannelEvent) {
        let Some(channel) = self.channels.get_mut(&id) else {
            debug!(channel = %id, ?event, "event for freed channel dropped");
            return;
        };
        if channel.events.is_empty() {
            self.ready.push_back(id);
        }
        channel.events.push_back(event);
    }

    /// Apply deferred releases, then drain every channel's queue in order.
    /// Returns the number of events applied.
    pub fn process_events(&mut self) -> usize {
        for id in self.deferred.drain() {
            if let Err(err) = self.release(id) {
                warn!(channel = %id, error = %err, "deferred release failed");
            }
        }

        let mut applied = 0;
        while let Some(id) = self.ready.pop_front() {
            loop {
                let Some(channel) = self.channels.get_mut(&id) else {
                    break;
                };
                let Some(event) = channel.events.pop_front() else {
                    break;
                };
                applied += 1;
                if channel.handle_event(event) {
                    if let Err(err) = self.release(id) {
                        warn!(channel = %id, error = %err, "release after event failed");
                    }
                }
            }
        }
        applied
    }

    /// Record one more reference held by an I/O pump.
    pub(crate) fn retain_for_io(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.get_mut(id)?;
        channel.refcount += 1;
        channel.io_refs += 1;
        Ok(())
    }

    pub(crate) fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel> {
        self.get_mut(id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let ids: Vec<_> = self.channels.keys().copied().collect();
        for id in ids {
            if let Some(mut channel) = self.channels.remove(&id) {
                channel.teardown();
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("channels", &self.channels.len())
            .field("next_id", &self.next_id)
            .field("ready", &self.ready.len())
            .finish()
    }
}
