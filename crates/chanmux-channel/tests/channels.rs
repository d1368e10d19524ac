#![cfg(unix)]

use std::cell::{Cell, RefCell};
use std::io::Read;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use chanmux_channel::{ChannelId, ChannelOptions, EventLoop, Part, Registry, StreamPart};
use chanmux_frame::{FrameWriter, Message, MessageDecoder};
use chanmux_rpc::{CallError, MethodTable};
use chanmux_transport::{ProcessSpawner, PtySize, SocketStream};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(10);

fn exited(id: ChannelId) -> impl FnMut(&Registry) -> bool {
    move |registry: &Registry| matches!(registry.exit_status(id), Ok(Some(_)))
}

fn collect(
    event_loop: &mut EventLoop,
    id: ChannelId,
    part: StreamPart,
) -> Rc<RefCell<Vec<Vec<u8>>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let consumer = move |data: &[u8]| sink.borrow_mut().push(data.to_vec());
    let registry = event_loop.registry_mut();
    let registered = match part {
        StreamPart::Stdout => registry.on_stdout(id, consumer),
        StreamPart::Stderr => registry.on_stderr(id, consumer),
    };
    registered.expect("channel should exist");
    seen
}

fn count_exits(event_loop: &mut EventLoop, id: ChannelId) -> Rc<Cell<u32>> {
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    event_loop
        .registry_mut()
        .on_exit(id, move |_, _| counter.set(counter.get() + 1))
        .expect("channel should exist");
    fired
}

/// Answers one `ping` with `"pong"`, then hangs up.
fn pong_server(mut socket: SocketStream) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut decoder = MessageDecoder::new();
        let mut buf = [0u8; 1024];
        let request = loop {
            if let Some(message) = decoder.next_message().expect("request should decode") {
                break message;
            }
            let n = socket.read(&mut buf).expect("server read should succeed");
            assert!(n > 0, "client hung up before sending a request");
            decoder.feed(&buf[..n]);
        };

        let Message::Request { id, method, .. } = request else {
            panic!("expected request, got {request:?}");
        };
        assert_eq!(method, "ping");
        FrameWriter::default()
            .write_message(&mut socket, &Message::response(id, Ok(json!("pong"))))
            .expect("response should be written");
    })
}

#[test]
fn socket_rpc_ping_resolves_and_close_exits_once() {
    let mut event_loop = EventLoop::new();
    let (local, remote) = SocketStream::pair().expect("socket pair should open");
    let server = pong_server(remote);

    let id = event_loop
        .registry_mut()
        .open_socket(local, ChannelOptions::rpc())
        .expect("channel should be created");
    let exits = count_exits(&mut event_loop, id);
    event_loop.start_io(id).expect("io should start");

    let mut call = event_loop
        .registry_mut()
        .send_request(id, "ping", json!([]))
        .expect("request should be sent");
    assert!(!call.is_resolved());

    assert!(event_loop.run_until(WAIT, |_| call.is_resolved()));
    assert_eq!(call.try_result(), Some(&Ok(json!("pong"))));

    server.join().expect("server thread should finish");
    assert!(event_loop.run_until(WAIT, exited(id)));
    assert_eq!(call.try_result(), Some(&Ok(json!("pong"))));
    assert_eq!(exits.get(), 1);

    event_loop.registry_mut().release(id).expect("release should succeed");
    assert!(event_loop.registry().lookup(id).is_none());
    assert_eq!(exits.get(), 1);
}

#[test]
fn socket_close_fails_pending_calls() {
    let mut event_loop = EventLoop::new();
    let (local, remote) = SocketStream::pair().expect("socket pair should open");
    let id = event_loop
        .registry_mut()
        .open_socket(local, ChannelOptions::rpc())
        .expect("channel should be created");
    event_loop.start_io(id).expect("io should start");

    let mut call = event_loop
        .registry_mut()
        .send_request(id, "never", json!([]))
        .expect("request should be sent");
    drop(remote);

    assert!(event_loop.run_until(WAIT, |_| call.is_resolved()));
    assert_eq!(call.try_result(), Some(&Err(CallError::ChannelClosed)));
    assert!(event_loop
        .registry_mut()
        .send_request(id, "late", json!([]))
        .is_err());
}

#[test]
fn buffered_process_output_arrives_once_with_exit_status() {
    let mut event_loop = EventLoop::new();
    let spawner = ProcessSpawner::new("sh").args(["-c", "printf a; printf b; printf err >&2; exit 3"]);
    let id = event_loop
        .registry_mut()
        .spawn(&spawner, ChannelOptions::buffered())
        .expect("process should spawn");
    let stdout = collect(&mut event_loop, id, StreamPart::Stdout);
    let stderr = collect(&mut event_loop, id, StreamPart::Stderr);
    let exits = count_exits(&mut event_loop, id);
    event_loop.start_io(id).expect("io should start");

    assert!(event_loop.run_until(WAIT, exited(id)));
    assert_eq!(*stdout.borrow(), vec![b"ab".to_vec()]);
    assert_eq!(*stderr.borrow(), vec![b"err".to_vec()]);
    assert_eq!(event_loop.registry().exit_status(id).unwrap(), Some(3));
    assert_eq!(exits.get(), 1);
    assert_eq!(event_loop.registry().info(id).unwrap().refcount, 1);
}

#[test]
fn unbuffered_process_echoes_input() {
    let mut event_loop = EventLoop::new();
    let id = event_loop
        .registry_mut()
        .spawn(&ProcessSpawner::new("cat"), ChannelOptions::default())
        .expect("cat should spawn");
    let stdout = collect(&mut event_loop, id, StreamPart::Stdout);
    event_loop.start_io(id).expect("io should start");

    let registry = event_loop.registry_mut();
    registry.send(id, b"line one\n").expect("write should succeed");
    registry.close_part(id, Part::Stdin).expect("stdin should close");

    assert!(event_loop.run_until(WAIT, exited(id)));
    assert_eq!(stdout.borrow().concat(), b"line one\n");
    assert_eq!(event_loop.registry().exit_status(id).unwrap(), Some(0));
}

#[test]
fn rpc_over_echoing_process_answers_itself() {
    // `cat` reflects the request back; the dispatcher answers it and the
    // reflected answer resolves the original call.
    let mut event_loop = EventLoop::new();
    let id = event_loop
        .registry_mut()
        .spawn(&ProcessSpawner::new("cat"), ChannelOptions::rpc())
        .expect("cat should spawn");
    event_loop
        .registry_mut()
        .set_dispatcher(id, MethodTable::new().method("echo", Ok))
        .expect("dispatcher should install");
    event_loop.start_io(id).expect("io should start");

    let mut call = event_loop
        .registry_mut()
        .send_request(id, "echo", json!(["hi"]))
        .expect("request should be sent");
    assert!(event_loop.run_until(WAIT, |_| call.is_resolved()));
    assert_eq!(call.try_result(), Some(&Ok(json!(["hi"]))));

    event_loop.registry_mut().stop(id).expect("stop should succeed");
    assert!(event_loop.run_until(WAIT, exited(id)));
}

#[test]
fn stop_terminates_process() {
    let mut event_loop = EventLoop::new();
    let id = event_loop
        .registry_mut()
        .spawn(&ProcessSpawner::new("sleep").arg("30"), ChannelOptions::default())
        .expect("sleep should spawn");
    event_loop.start_io(id).expect("io should start");

    event_loop.registry_mut().stop(id).expect("stop should succeed");
    assert!(event_loop.run_until(WAIT, exited(id)));
    assert_eq!(
        event_loop.registry().exit_status(id).unwrap(),
        Some(128 + 15)
    );
}

#[test]
fn pty_process_output_and_resize() {
    let mut event_loop = EventLoop::new();
    let spawner = ProcessSpawner::new("sh").args(["-c", "read line; stty size; echo got $line"]);
    let id = event_loop
        .registry_mut()
        .spawn_pty(&spawner, PtySize { rows: 24, cols: 80 }, ChannelOptions::default())
        .expect("pty process should spawn");
    let stdout = collect(&mut event_loop, id, StreamPart::Stdout);
    event_loop.start_io(id).expect("io should start");

    let registry = event_loop.registry_mut();
    assert!(registry.info(id).unwrap().pty);
    registry.resize_pty(id, 100, 40).expect("resize should succeed");
    registry.send(id, b"word\n").expect("input should be written");

    assert!(event_loop.run_until(WAIT, exited(id)));
    let output = String::from_utf8_lossy(&stdout.borrow().concat()).into_owned();
    assert!(output.contains("40 100"), "unexpected output: {output:?}");
    assert!(output.contains("got word"), "unexpected output: {output:?}");
    assert_eq!(event_loop.registry().exit_status(id).unwrap(), Some(0));
}

#[test]
fn dropping_registry_stops_running_processes() {
    let mut registry = Registry::new();
    let id = registry
        .spawn(&ProcessSpawner::new("sleep").arg("30"), ChannelOptions::default())
        .expect("sleep should spawn");
    let pid = registry.lookup(id).and_then(|c| c.pid()).expect("pid should be known");
    let status = Rc::new(Cell::new(None));
    let slot = Rc::clone(&status);
    registry
        .on_exit(id, move |_, code| slot.set(Some(code)))
        .expect("channel should exist");

    drop(registry);
    assert_eq!(status.get(), Some(chanmux_channel::ABANDONED));
    #[cfg(target_os = "linux")]
    assert!(gone(pid), "process {pid} was left behind");
    let _ = pid;
}

/// Neither running nor waiting to be reaped.
#[cfg(target_os = "linux")]
fn gone(pid: u32) -> bool {
    !std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(target_os = "linux")]
#[test]
fn releasing_unstarted_process_reaps_it() {
    let mut registry = Registry::new();
    let id = registry
        .spawn(&ProcessSpawner::new("sleep").arg("30"), ChannelOptions::default())
        .expect("sleep should spawn");
    let pid = registry.lookup(id).and_then(|c| c.pid()).expect("pid should be known");

    registry.release(id).expect("release should succeed");
    assert!(!registry.contains(id));
    assert!(gone(pid), "process {pid} was left behind");
}

#[cfg(target_os = "linux")]
#[test]
fn dropping_loop_reaps_process_being_waited_on() {
    let mut event_loop = EventLoop::new();
    let id = event_loop
        .registry_mut()
        .spawn(&ProcessSpawner::new("sleep").arg("30"), ChannelOptions::default())
        .expect("sleep should spawn");
    let pid = event_loop
        .registry()
        .lookup(id)
        .and_then(|c| c.pid())
        .expect("pid should be known");
    event_loop.start_io(id).expect("io should start");

    drop(event_loop);
    assert!(gone(pid), "process {pid} was left behind");
}

#[test]
fn stop_after_exit_is_a_no_op() {
    let mut event_loop = EventLoop::new();
    let id = event_loop
        .registry_mut()
        .spawn(&ProcessSpawner::new("true"), ChannelOptions::default())
        .expect("true should spawn");
    event_loop.start_io(id).expect("io should start");
    assert!(event_loop.run_until(WAIT, exited(id)));

    event_loop.registry_mut().stop(id).expect("stop should succeed");
    assert_eq!(event_loop.registry().exit_status(id).unwrap(), Some(0));
}
