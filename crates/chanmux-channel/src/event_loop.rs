use std::io::{ErrorKind, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chanmux_transport::{exit_code, ChannelKind, ChildHandle, Stream};
use tracing::{debug, trace, warn};

use crate::channel::{ChannelId, ABANDONED};
use crate::error::Result;
use crate::event::{ChannelEvent, StreamPart};
use crate::registry::Registry;

type Envelope = (ChannelId, ChannelEvent);

/// Posts channel events to an [`EventLoop`] from any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Envelope>,
}

impl EventSender {
    /// Returns false once the loop is gone.
    pub fn post(&self, id: ChannelId, event: ChannelEvent) -> bool {
        self.tx.send((id, event)).is_ok()
    }
}

/// Single-threaded loop that owns a [`Registry`] and feeds it events from
/// I/O pump threads.
///
/// Pumps block on their stream in a dedicated thread and post what they read.
/// All callbacks run on the thread calling [`run_once`](EventLoop::run_once).
pub struct EventLoop {
    registry: Registry,
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { registry, tx, rx }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Start pumping the channel's streams into the loop.
    ///
    /// One pump thread per readable stream, plus a waiter for process peers.
    /// Each holds a channel reference until its terminal event is applied.
    pub fn start_io(&mut self, id: ChannelId) -> Result<()> {
        let channel = self.registry.channel_mut(id)?;
        let kind = channel.kind();
        if !kind.has_streams() {
            debug!(channel = %id, "loopback channel has no streams to pump");
            return Ok(());
        }

        let chunk = channel.read_chunk_size.max(1);
        let is_pty = kind == ChannelKind::Pty;
        let stdout = channel.transport.instream().take_reader()?;
        let stderr = match channel.transport.errstream().map(Stream::take_reader).transpose() {
            Ok(stderr) => stderr,
            Err(err) => {
                channel.transport.instream().restore_reader(stdout);
                return Err(err.into());
            }
        };
        let child = channel.transport.child().cloned();

        let sources = std::iter::once((StreamPart::Stdout, stdout))
            .chain(stderr.map(|reader| (StreamPart::Stderr, reader)));
        let mut pumps = Vec::new();
        // Pump events are applied on this thread only, so each reference is
        // taken once its thread exists and is never leaked by a failed spawn.
        for (part, reader) in sources {
            let tx = self.tx.clone();
            let handle = thread::Builder::new()
                .name(format!("chanmux-{id}-{part}"))
                .spawn(move || pump(id, part, reader, chunk, is_pty, tx))?;
            self.registry.retain_for_io(id)?;
            pumps.push(handle);
        }

        if let Some(child) = child {
            let tx = self.tx.clone();
            thread::Builder::new()
                .name(format!("chanmux-{id}-wait"))
                .spawn(move || wait_child(id, child, pumps, tx))?;
            self.registry.retain_for_io(id)?;
        }

        debug!(channel = %id, %kind, "channel io started");
        Ok(())
    }

    /// Wait up to `timeout` for events, apply everything available and
    /// return the number of events applied.
    pub fn run_once(&mut self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok((id, event)) => {
                self.registry.enqueue(id, event);
                while let Ok((id, event)) = self.rx.try_recv() {
                    self.registry.enqueue(id, event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // The loop keeps a sender of its own.
            Err(RecvTimeoutError::Disconnected) => {}
        }
        self.registry.process_events()
    }

    /// Run until `done` returns true or `timeout` elapses. Returns whether
    /// `done` was satisfied.
    pub fn run_until(
        &mut self,
        timeout: Duration,
        mut done: impl FnMut(&Registry) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.registry) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.run_once((deadline - now).min(Duration::from_millis(50)));
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("registry", &self.registry)
            .finish()
    }
}

fn pump(
    id: ChannelId,
    part: StreamPart,
    mut reader: Box<dyn Read + Send>,
    chunk: usize,
    is_pty: bool,
    tx: Sender<Envelope>,
) {
    let mut buf = vec![0u8; chunk];
    let last = loop {
        match reader.read(&mut buf) {
            Ok(0) => break ChannelEvent::Eof { part },
            Ok(n) => {
                trace!(channel = %id, %part, len = n, "read");
                let data = Bytes::copy_from_slice(&buf[..n]);
                if tx.send((id, ChannelEvent::Data { part, data })).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            // A pty master reports EIO once the child side is gone.
            Err(err) if is_pty && is_eio(&err) => break ChannelEvent::Eof { part },
            Err(err) => {
                break ChannelEvent::Fault {
                    part,
                    message: err.to_string(),
                }
            }
        }
    };
    let _ = tx.send((id, last));
}

fn wait_child(id: ChannelId, child: ChildHandle, pumps: Vec<JoinHandle<()>>, tx: Sender<Envelope>) {
    let status = match child.wait() {
        Ok(Some(status)) => exit_code(status),
        Ok(None) => {
            debug!(channel = %id, "child reaped by teardown");
            ABANDONED
        }
        Err(err) => {
            warn!(channel = %id, error = %err, "failed to wait for child");
            ABANDONED
        }
    };
    // Output that is still in flight is delivered before the exit.
    for handle in pumps {
        if handle.join().is_err() {
            warn!(channel = %id, "pump thread panicked");
        }
    }
    debug!(channel = %id, status, "child exited");
    let _ = tx.send((id, ChannelEvent::Exited { status }));
}

#[cfg(unix)]
fn is_eio(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}

#[cfg(not(unix))]
fn is_eio(_err: &std::io::Error) -> bool {
    false
}
