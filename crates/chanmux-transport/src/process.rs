use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::Stream;

/// Stdio endpoints of a child process started with piped stdio.
pub struct ProcessStreams {
    pub(crate) child: ChildHandle,
    pub(crate) stdin: Stream,
    pub(crate) stdout: Stream,
    pub(crate) stderr: Stream,
}

impl ProcessStreams {
    /// Wrap a child that was spawned with all three stdio handles piped.
    pub fn from_child(mut child: Child) -> Result<Self> {
        let missing = |name: &'static str| TransportError::Unsupported {
            stream: name,
            op: "non-piped child stdio",
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        Ok(Self {
            stdin: Stream::writer("stdin", stdin),
            stdout: Stream::reader("stdout", stdout),
            stderr: Stream::reader("stderr", stderr),
            child: ChildHandle::new(child),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    pub fn child(&self) -> &ChildHandle {
        &self.child
    }
}

impl std::fmt::Debug for ProcessStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStreams")
            .field("child", &self.child)
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish()
    }
}

/// Builder for child processes that back process and pty channels.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    pub(crate) program: OsString,
    pub(crate) args: Vec<OsString>,
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) env: Vec<(OsString, OsString)>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Display form of the command line for logs and errors.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    /// Start the child with piped stdin/stdout/stderr.
    pub fn spawn(&self) -> Result<ProcessStreams> {
        let child = self
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: self.display(),
                source,
            })?;
        info!(pid = child.id(), command = %self.display(), "spawned process");
        ProcessStreams::from_child(child)
    }
}

/// Shared handle to a spawned child.
///
/// The `Child` lives behind a lock until it is reaped, and every signal is
/// sent while holding that lock with the child still present. A pid is
/// therefore never signalled after `wait` released it for reuse.
#[derive(Clone)]
pub struct ChildHandle {
    pid: u32,
    child: Arc<Mutex<Option<Child>>>,
}

impl ChildHandle {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(Some(child))),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_reaped(&self) -> bool {
        self.lock().is_none()
    }

    /// Send SIGTERM. Returns `false` without signalling once the child has
    /// been reaped.
    #[cfg(unix)]
    pub fn terminate(&self) -> Result<bool> {
        let guard = self.lock();
        if guard.is_none() {
            debug!(pid = self.pid, "child already reaped; not signalling");
            return Ok(false);
        }
        let pid = libc::pid_t::try_from(self.pid).map_err(|_| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "pid out of range",
            ))
        })?;
        // SAFETY: kill(2) takes plain integers. The child is unreaped while
        // the lock is held, so `pid` still names it.
        if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
        debug!(pid, "sent SIGTERM");
        Ok(true)
    }

    #[cfg(not(unix))]
    pub fn terminate(&self) -> Result<bool> {
        Err(TransportError::Unsupported {
            stream: "process",
            op: "terminate",
        })
    }

    /// Kill the child if it is still around and reap it now.
    ///
    /// Returns `None` if it was already reaped.
    pub fn kill_and_reap(&self) -> Result<Option<ExitStatus>> {
        let Some(mut child) = self.lock().take() else {
            return Ok(None);
        };
        if let Err(err) = child.kill() {
            debug!(pid = self.pid, error = %err, "kill failed; reaping anyway");
        }
        let status = child.wait()?;
        debug!(pid = self.pid, ?status, "child killed and reaped");
        Ok(Some(status))
    }

    /// Block until the child exits and reap it.
    ///
    /// The lock is not held while blocking, so `terminate` and
    /// `kill_and_reap` stay usable. Returns `None` if `kill_and_reap` reaped
    /// the child first.
    pub fn wait(&self) -> Result<Option<ExitStatus>> {
        self.wait_exited();
        let child = self.lock().take();
        match child {
            Some(mut child) => Ok(Some(child.wait()?)),
            None => Ok(None),
        }
    }

    /// Wait for exit without reaping, leaving the pid reserved.
    #[cfg(unix)]
    fn wait_exited(&self) {
        let Ok(pid) = libc::id_t::try_from(self.pid) else {
            return;
        };
        loop {
            // SAFETY: siginfo_t is plain data; an all-zero value is valid.
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            // SAFETY: `info` is a valid out-pointer for the duration of the call.
            let rc = unsafe {
                libc::waitid(libc::P_PID, pid, &mut info, libc::WEXITED | libc::WNOWAIT)
            };
            if rc == 0 {
                return;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                // ECHILD: reaped elsewhere. Anything else falls back to a plain wait.
                debug!(pid, error = %err, "waitid ended");
                return;
            }
        }
    }

    #[cfg(not(unix))]
    fn wait_exited(&self) {
        loop {
            match self.lock().as_mut().map(Child::try_wait) {
                Some(Ok(None)) => {}
                _ => return,
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildHandle")
            .field("pid", &self.pid)
            .field("reaped", &self.is_reaped())
            .finish()
    }
}

/// Exit code reported for a finished child.
///
/// Processes killed by a signal report `128 + signal`, matching shells.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn spawn_pipes_all_stdio() {
        let mut streams = ProcessSpawner::new("sh")
            .args(["-c", "read line; echo \"out:$line\"; echo err >&2"])
            .spawn()
            .unwrap();
        assert!(streams.pid() > 0);

        streams.stdin.write_all(b"hi\n").unwrap();
        streams.stdin.close();

        let mut out = String::new();
        streams
            .stdout
            .take_reader()
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        let mut err = String::new();
        streams
            .stderr
            .take_reader()
            .unwrap()
            .read_to_string(&mut err)
            .unwrap();

        assert_eq!(out, "out:hi\n");
        assert_eq!(err, "err\n");

        let status = streams.child().wait().unwrap().unwrap();
        assert_eq!(exit_code(status), 0);
    }

    #[test]
    fn spawn_failure_names_command() {
        let err = ProcessSpawner::new("/nonexistent/chanmux-binary")
            .arg("x")
            .spawn()
            .unwrap_err();
        match err {
            TransportError::Spawn { command, .. } => {
                assert_eq!(command, "/nonexistent/chanmux-binary x")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn exit_code_reports_status_and_signals() {
        let streams = ProcessSpawner::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
        let status = streams.child().wait().unwrap().unwrap();
        assert_eq!(exit_code(status), 7);

        let streams = ProcessSpawner::new("sleep").arg("30").spawn().unwrap();
        assert!(streams.child().terminate().unwrap());
        let status = streams.child().wait().unwrap().unwrap();
        assert_eq!(exit_code(status), 128 + libc::SIGTERM);
    }

    #[test]
    fn reaped_child_is_never_signalled() {
        let streams = ProcessSpawner::new("true").spawn().unwrap();
        let child = streams.child().clone();
        child.wait().unwrap().unwrap();

        assert!(child.is_reaped());
        assert!(!child.terminate().unwrap());
        assert!(child.kill_and_reap().unwrap().is_none());
        assert!(child.wait().unwrap().is_none());
    }

    #[test]
    fn kill_and_reap_leaves_no_zombie() {
        let streams = ProcessSpawner::new("sleep").arg("30").spawn().unwrap();
        let child = streams.child().clone();
        let pid = child.pid();

        let status = child.kill_and_reap().unwrap().unwrap();
        assert_eq!(exit_code(status), 128 + libc::SIGKILL);
        assert!(child.is_reaped());
        #[cfg(target_os = "linux")]
        assert!(!std::path::Path::new(&format!("/proc/{pid}")).exists());
        let _ = pid;
    }

    #[test]
    fn waiter_returns_when_child_is_reaped_elsewhere() {
        let streams = ProcessSpawner::new("sleep").arg("30").spawn().unwrap();
        let waiter = {
            let child = streams.child().clone();
            std::thread::spawn(move || child.wait().unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(50));

        let killed = streams.child().kill_and_reap().unwrap();
        let waited = waiter.join().unwrap();
        assert_eq!(killed.is_some() as u8 + waited.is_some() as u8, 1);
    }
}
