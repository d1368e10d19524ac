//! Pseudo-terminal backed child processes.

use crate::error::{Result, TransportError};
use crate::process::{ChildHandle, ProcessSpawner};
use crate::stream::Stream;

/// Terminal window size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Endpoints of a child attached to a pseudo-terminal.
///
/// Both endpoints are views of the pty master: reads return what the child
/// writes to its terminal, writes become the child's terminal input.
pub struct PtyStreams {
    pub(crate) child: ChildHandle,
    pub(crate) stdin: Stream,
    pub(crate) stdout: Stream,
    size: PtySize,
    #[cfg(unix)]
    master: std::os::fd::OwnedFd,
}

impl PtyStreams {
    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    pub fn size(&self) -> PtySize {
        self.size
    }

    pub fn child(&self) -> &ChildHandle {
        &self.child
    }

    /// Update the terminal window size seen by the child.
    #[cfg(unix)]
    pub fn resize(&mut self, size: PtySize) -> Result<()> {
        use std::os::fd::AsRawFd;

        let winsize = libc::winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: the master fd is open for the lifetime of `self` and
        // `winsize` is a valid, initialized struct for TIOCSWINSZ.
        let rc = unsafe {
            libc::ioctl(
                self.master.as_raw_fd(),
                libc::TIOCSWINSZ as _,
                &winsize as *const libc::winsize,
            )
        };
        if rc != 0 {
            return Err(TransportError::Pty(std::io::Error::last_os_error()));
        }
        self.size = size;
        tracing::debug!(pid = self.pid(), rows = size.rows, cols = size.cols, "pty resized");
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn resize(&mut self, _size: PtySize) -> Result<()> {
        Err(TransportError::Unsupported {
            stream: "pty",
            op: "resize",
        })
    }
}

impl std::fmt::Debug for PtyStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyStreams")
            .field("child", &self.child)
            .field("size", &self.size)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .finish()
    }
}

impl ProcessSpawner {
    /// Start the child as a session leader with a fresh pty as its
    /// controlling terminal and stdio.
    #[cfg(unix)]
    pub fn spawn_pty(&self, size: PtySize) -> Result<PtyStreams> {
        use std::fs::File;
        use std::os::fd::{FromRawFd, OwnedFd};
        use std::os::unix::process::CommandExt;
        use std::process::Stdio;

        let mut master_fd: libc::c_int = -1;
        let mut slave_fd: libc::c_int = -1;
        let mut winsize = libc::winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: all out-pointers refer to live locals; name and termios are
        // optional and passed as null.
        let rc = unsafe {
            libc::openpty(
                &mut master_fd,
                &mut slave_fd,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut winsize,
            )
        };
        if rc != 0 {
            return Err(TransportError::Pty(std::io::Error::last_os_error()));
        }
        // SAFETY: openpty succeeded, so both descriptors are open and owned by us.
        let (master, slave) =
            unsafe { (OwnedFd::from_raw_fd(master_fd), OwnedFd::from_raw_fd(slave_fd)) };

        let mut cmd = self.command();
        cmd.stdin(Stdio::from(slave.try_clone().map_err(TransportError::Pty)?))
            .stdout(Stdio::from(slave.try_clone().map_err(TransportError::Pty)?))
            .stderr(Stdio::from(slave));

        // SAFETY: the closure only calls async-signal-safe functions.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: self.display(),
            source,
        })?;
        // The parent's copies of the slave fd were moved into `cmd`; drop it so
        // the master sees EOF once the child exits.
        drop(cmd);

        let reader = File::from(master.try_clone().map_err(TransportError::Pty)?);
        let writer = File::from(master.try_clone().map_err(TransportError::Pty)?);

        tracing::info!(
            pid = child.id(),
            command = %self.display(),
            rows = size.rows,
            cols = size.cols,
            "spawned pty process"
        );

        Ok(PtyStreams {
            child: ChildHandle::new(child),
            stdin: Stream::writer("pty", writer),
            stdout: Stream::reader("pty", reader),
            size,
            master,
        })
    }

    #[cfg(not(unix))]
    pub fn spawn_pty(&self, _size: PtySize) -> Result<PtyStreams> {
        Err(TransportError::Unsupported {
            stream: "pty",
            op: "spawning",
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{ErrorKind, Read, Write};

    use super::*;

    fn read_until(reader: &mut dyn Read, needle: &str) -> String {
        let mut seen = String::new();
        let mut buf = [0u8; 256];
        while !seen.contains(needle) {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => seen.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                // Linux reports EIO on the master once the slave side is gone.
                Err(_) => break,
            }
        }
        seen
    }

    #[test]
    fn child_sees_a_terminal() {
        let mut pty = ProcessSpawner::new("sh")
            .args(["-c", "if [ -t 1 ]; then echo is-tty; else echo not-tty; fi"])
            .spawn_pty(PtySize::default())
            .unwrap();

        let mut reader = pty.stdout.take_reader().unwrap();
        let output = read_until(reader.as_mut(), "tty");
        assert!(output.contains("is-tty"), "output was {output:?}");

        pty.child().wait().unwrap();
    }

    #[test]
    fn input_reaches_child_and_resize_applies() {
        let mut pty = ProcessSpawner::new("sh")
            .args(["-c", "read line; echo \"got:$line\"; stty size"])
            .spawn_pty(PtySize { rows: 24, cols: 80 })
            .unwrap();
        pty.resize(PtySize { rows: 40, cols: 100 }).unwrap();
        assert_eq!(pty.size(), PtySize { rows: 40, cols: 100 });

        let mut reader = pty.stdout.take_reader().unwrap();
        pty.stdin.write_all(b"abc\n").unwrap();

        let output = read_until(reader.as_mut(), "40 100");
        assert!(output.contains("got:abc"), "output was {output:?}");
        assert!(output.contains("40 100"), "output was {output:?}");

        pty.child().wait().unwrap();
    }
}
