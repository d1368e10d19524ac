use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::socket::SocketStream;

/// One endpoint of a channel transport.
///
/// A stream is readable, writable, or (for sockets) both. The read side is
/// handed out once to whatever drives reads; writes happen in place on the
/// loop thread.
pub struct Stream {
    name: &'static str,
    io: Option<StreamIo>,
}

enum StreamIo {
    Reader(Option<Box<dyn Read + Send>>),
    Writer(Box<dyn Write + Send>),
    Socket(SocketStream),
}

impl Stream {
    /// A read-only endpoint.
    pub fn reader(name: &'static str, inner: impl Read + Send + 'static) -> Self {
        Self {
            name,
            io: Some(StreamIo::Reader(Some(Box::new(inner)))),
        }
    }

    /// A write-only endpoint.
    pub fn writer(name: &'static str, inner: impl Write + Send + 'static) -> Self {
        Self {
            name,
            io: Some(StreamIo::Writer(Box::new(inner))),
        }
    }

    /// A bidirectional socket endpoint.
    pub fn socket(name: &'static str, inner: SocketStream) -> Self {
        Self {
            name,
            io: Some(StreamIo::Socket(inner)),
        }
    }

    /// Diagnostic name of the endpoint (`stdout`, `stdin`, `socket`, ...).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_none()
    }

    pub fn is_readable(&self) -> bool {
        matches!(self.io, Some(StreamIo::Reader(_)) | Some(StreamIo::Socket(_)))
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.io, Some(StreamIo::Writer(_)) | Some(StreamIo::Socket(_)))
    }

    /// Hand out the read side of this stream.
    ///
    /// Pipe readers move out and can be taken once. Sockets are cloned so the
    /// original keeps serving writes.
    pub fn take_reader(&mut self) -> Result<Box<dyn Read + Send>> {
        match &mut self.io {
            None => Err(TransportError::Closed(self.name)),
            Some(StreamIo::Reader(reader)) => {
                reader.take().ok_or(TransportError::ReaderTaken(self.name))
            }
            Some(StreamIo::Socket(socket)) => Ok(Box::new(socket.try_clone()?)),
            Some(StreamIo::Writer(_)) => Err(TransportError::Unsupported {
                stream: self.name,
                op: "reading",
            }),
        }
    }

    /// Return a reader taken with [`take_reader`](Self::take_reader) that
    /// was never used. Socket endpoints hand out clones, so nothing is kept.
    pub fn restore_reader(&mut self, reader: Box<dyn Read + Send>) {
        if let Some(StreamIo::Reader(slot @ None)) = &mut self.io {
            *slot = Some(reader);
        }
    }

    /// Close the endpoint. Idempotent.
    ///
    /// Sockets are shut down in both directions so that any reader holding a
    /// clone observes EOF.
    pub fn close(&mut self) {
        if let Some(io) = self.io.take() {
            if let StreamIo::Socket(socket) = &io {
                if let Err(err) = socket.shutdown(Shutdown::Both) {
                    debug!(stream = self.name, error = %err, "socket shutdown failed");
                }
            }
            debug!(stream = self.name, "stream closed");
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.io {
            Some(StreamIo::Writer(writer)) => writer.write(buf),
            Some(StreamIo::Socket(socket)) => socket.write(buf),
            Some(StreamIo::Reader(_)) => Err(std::io::Error::new(
                ErrorKind::Unsupported,
                format!("stream '{}' is read-only", self.name),
            )),
            None => Err(std::io::Error::new(
                ErrorKind::BrokenPipe,
                format!("stream '{}' closed", self.name),
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.io {
            Some(StreamIo::Writer(writer)) => writer.flush(),
            Some(StreamIo::Socket(socket)) => socket.flush(),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.io {
            None => "closed",
            Some(StreamIo::Reader(Some(_))) => "reader",
            Some(StreamIo::Reader(None)) => "reader(taken)",
            Some(StreamIo::Writer(_)) => "writer",
            Some(StreamIo::Socket(_)) => "socket",
        };
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}
