use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// A connected socket backing a socket-kind channel.
///
/// The same stream is both read from and written to.
pub struct SocketStream {
    inner: SocketStreamInner,
}

enum SocketStreamInner {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            SocketStreamInner::Unix(stream) => stream.read(buf),
            SocketStreamInner::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            SocketStreamInner::Unix(stream) => stream.write(buf),
            SocketStreamInner::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            SocketStreamInner::Unix(stream) => stream.flush(),
            SocketStreamInner::Tcp(stream) => stream.flush(),
        }
    }
}

#[cfg(unix)]
impl From<UnixStream> for SocketStream {
    fn from(stream: UnixStream) -> Self {
        Self {
            inner: SocketStreamInner::Unix(stream),
        }
    }
}

impl From<TcpStream> for SocketStream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: SocketStreamInner::Tcp(stream),
        }
    }
}

impl SocketStream {
    /// Blocking connect to a Unix domain socket at `path`.
    #[cfg(unix)]
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            target: path.display().to_string(),
            source: e,
        })?;
        debug!(?path, "socket channel connected");
        Ok(Self::from(stream))
    }

    /// Connect to a TCP address (blocking).
    pub fn connect_tcp(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let target = format!("{addr:?}");
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            target: target.clone(),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        debug!(%target, "connected to tcp socket");
        Ok(Self::from(stream))
    }

    /// Create a connected pair of Unix sockets.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from(left), Self::from(right)))
    }

    /// Duplicate the underlying descriptor, so reads and writes can run on separate threads.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            SocketStreamInner::Unix(stream) => Ok(Self::from(stream.try_clone()?)),
            SocketStreamInner::Tcp(stream) => Ok(Self::from(stream.try_clone()?)),
        }
    }

    /// Shut down one or both halves of the connection.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            SocketStreamInner::Unix(stream) => stream.shutdown(how).map_err(Into::into),
            SocketStreamInner::Tcp(stream) => stream.shutdown(how).map_err(Into::into),
        }
    }

    /// `"unix"` or `"tcp"`.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            SocketStreamInner::Unix(_) => "unix",
            SocketStreamInner::Tcp(_) => "tcp",
        }
    }
}

impl std::fmt::Debug for SocketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

/// Device and inode of a socket file, used to tell our socket apart from one
/// that replaced it.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
impl SocketIdentity {
    /// Identity of the socket at `path`, or `None` if nothing or a non-socket
    /// lives there.
    fn of(path: &Path) -> Option<Self> {
        let metadata = std::fs::symlink_metadata(path).ok()?;
        metadata.file_type().is_socket().then(|| Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }
}

/// Unix domain socket server that hands out blocking [`SocketStream`]s.
///
/// Binding replaces a stale socket file but refuses to touch anything else.
/// On drop the socket file is unlinked, unless another socket took its place.
#[cfg(unix)]
pub struct UnixSocketListener {
    listener: UnixListener,
    path: PathBuf,
    identity: Option<SocketIdentity>,
}

#[cfg(unix)]
impl UnixSocketListener {
    /// Mode applied to the socket file after binding.
    pub const SOCKET_MODE: u32 = 0o600;

    // sockaddr_un.sun_path, including the trailing NUL.
    #[cfg(target_os = "linux")]
    const SUN_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const SUN_PATH_LEN: usize = 104;

    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let len = path.as_os_str().len();
        if len >= Self::SUN_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: Self::SUN_PATH_LEN,
            });
        }

        let bind_error = |source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };
        clear_stale_socket(path).map_err(bind_error)?;
        let listener = UnixListener::bind(path).map_err(bind_error)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(bind_error)?;

        info!(?path, "channel socket listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            identity: SocketIdentity::of(path),
        })
    }

    /// Accept one connection.
    ///
    /// The accepted stream is always blocking, even when the listener is not.
    pub fn accept(&self) -> Result<SocketStream> {
        let (stream, _) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nonblocking(false)?;
        debug!(path = ?self.path, "connection accepted");
        Ok(SocketStream::from(stream))
    }

    /// Switch between blocking and non-blocking accepts.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(Into::into)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Remove a socket file left behind by an earlier listener.
#[cfg(unix)]
fn clear_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
        Ok(metadata) if metadata.file_type().is_socket() => {
            debug!(?path, "replacing stale socket file");
            std::fs::remove_file(path)
        }
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        )),
    }
}

#[cfg(unix)]
impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        if self.identity.is_some() && SocketIdentity::of(&self.path) == self.identity {
            let _ = std::fs::remove_file(&self.path);
            debug!(path = ?self.path, "socket file removed");
        } else {
            debug!(path = ?self.path, "socket file replaced or gone; leaving it");
        }
    }
}
