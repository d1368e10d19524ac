#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

const TRANSPORT_ERROR: i32 = 3;

const POLL: Duration = Duration::from_millis(25);

fn chanmux() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_chanmux"));
    command.arg("--log-level").arg("error");
    command
}

/// Scratch directory under the system temp dir, removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn new(tag: &str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("chanmux-cli-{tag}-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("scratch dir should be creatable");
        Self(dir)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// A `chanmux serve` process that exits after `count` connections close.
struct Server {
    child: Child,
    socket: PathBuf,
    _dir: ScratchDir,
}

impl Server {
    fn start(tag: &str, count: usize) -> Self {
        let dir = ScratchDir::new(tag);
        let socket = dir.0.join("serve.sock");
        let child = chanmux()
            .arg("serve")
            .arg(&socket)
            .args(["--count", &count.to_string()])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");
        Self {
            child,
            socket,
            _dir: dir,
        }
    }

    /// Run `chanmux call`, retrying while the socket is not up yet.
    fn call(&self, args: &[&str]) -> Output {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let output = chanmux()
                .args(["--format", "json", "call"])
                .arg(&self.socket)
                .args(args)
                .output()
                .expect("call command should run");
            let listening = output.status.code() != Some(TRANSPORT_ERROR);
            if listening || Instant::now() >= deadline {
                return output;
            }
            thread::sleep(POLL);
        }
    }

    fn exit_code(mut self) -> Option<i32> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait().expect("server status should be readable") {
                return status.code();
            }
            thread::sleep(POLL);
        }
        None
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn json_stdout(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("call output should be JSON")
}

#[test]
fn ping_is_answered_with_pong() {
    let server = Server::start("ping", 1);

    let output = server.call(&["ping"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let body = json_stdout(&output);
    assert_eq!(body["method"], "ping");
    assert_eq!(body["result"], "pong");
    assert!(body["request_id"].is_u64());

    assert_eq!(server.exit_code(), Some(0));
}

#[test]
fn echo_returns_its_params() {
    let server = Server::start("echo", 1);

    let output = server.call(&["echo", "--params", r#"[1,"two"]"#]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(json_stdout(&output)["result"], serde_json::json!([1, "two"]));

    assert_eq!(server.exit_code(), Some(0));
}

#[test]
fn unknown_method_fails_with_remote_message() {
    let server = Server::start("unknown", 1);

    let output = server.call(&["nope"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid method: nope"), "stderr: {stderr}");

    assert_eq!(server.exit_code(), Some(0));
}

#[test]
fn absent_socket_exits_with_transport_code() {
    let dir = ScratchDir::new("absent");
    let output = chanmux()
        .arg("call")
        .arg(dir.0.join("absent.sock"))
        .arg("ping")
        .output()
        .expect("call command should run");

    assert_eq!(output.status.code(), Some(TRANSPORT_ERROR));
}

#[test]
fn run_relays_output_and_exit_code() {
    let output = chanmux()
        .args(["run", "sh", "-c", "echo hi; echo oops >&2; exit 7"])
        .stdin(Stdio::null())
        .output()
        .expect("run command should run");

    assert_eq!(output.status.code(), Some(7));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "hi\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("oops"));
}

#[test]
fn run_buffered_with_summary_reports_channel() {
    let output = chanmux()
        .args(["--format", "json", "run", "--buffered", "--summary", "printf", "abc"])
        .stdin(Stdio::null())
        .output()
        .expect("run command should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let (relayed, summary) = stdout.split_at(3);
    assert_eq!(relayed, "abc");

    let channel: Value = serde_json::from_str(summary.trim()).expect("summary should be JSON");
    assert_eq!(channel["kind"], "process");
    assert_eq!(channel["exit_status"], 0);
}

#[test]
fn version_prints_package_version() {
    let output = chanmux()
        .arg("version")
        .output()
        .expect("version command should run");

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("chanmux {}", env!("CARGO_PKG_VERSION"))
    );
}
