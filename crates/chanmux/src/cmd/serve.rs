use std::cell::RefCell;
use std::io::ErrorKind;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chanmux_channel::{ChannelId, ChannelOptions, EventLoop};
use chanmux_rpc::{Dispatcher, MethodTable, Reply};
use chanmux_transport::{SocketStream, TransportError, UnixSocketListener};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cmd::{interrupt_flag, ServeArgs};
use crate::exit::{channel_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_channels, OutputFormat};

const TICK: Duration = Duration::from_millis(50);

/// Requests that need the registry, answered after the dispatcher returns.
type Backlog = Rc<RefCell<Vec<(ChannelId, u64)>>>;

/// Dispatcher for one served connection.
///
/// `ping` and `echo` are answered in place. `channels` lists the registry,
/// which the dispatcher cannot reach, so it is deferred to the serve loop.
struct ServeDispatcher {
    id: ChannelId,
    methods: MethodTable,
    backlog: Backlog,
}

impl ServeDispatcher {
    fn new(id: ChannelId, backlog: Backlog) -> Self {
        let methods = MethodTable::new()
            .method("ping", |_| Ok(json!("pong")))
            .method("echo", Ok);
        Self {
            id,
            methods,
            backlog,
        }
    }
}

impl Dispatcher for ServeDispatcher {
    fn handle_request(&mut self, request_id: u64, method: &str, params: Value) -> Reply {
        if method != "channels" {
            return self.methods.handle_request(request_id, method, params);
        }
        self.backlog.borrow_mut().push((self.id, request_id));
        Reply::Deferred
    }

    fn handle_notification(&mut self, method: &str, params: Value) {
        info!(channel = %self.id, method, %params, "notification received");
    }
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let listener =
        UnixSocketListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| transport_error("bind failed", err))?;

    let running = interrupt_flag()?;
    let mut event_loop = EventLoop::new();
    let backlog: Backlog = Rc::new(RefCell::new(Vec::new()));
    let finished: Rc<RefCell<Vec<ChannelId>>> = Rc::new(RefCell::new(Vec::new()));
    let mut closed = 0usize;

    info!(path = %listener.path().display(), "serving");
    while running.load(Ordering::SeqCst) {
        while let Some(socket) = accept(&listener)? {
            open_connection(&mut event_loop, socket, &backlog, &finished)?;
        }

        event_loop.run_once(TICK);

        let registry = event_loop.registry_mut();
        for (id, request_id) in std::mem::take(&mut *backlog.borrow_mut()) {
            let listing = serde_json::to_value(registry.list()).unwrap_or(Value::Null);
            if let Err(err) = registry.respond(id, request_id, Ok(listing)) {
                warn!(channel = %id, request_id, error = %err, "reply failed");
            }
        }

        for id in std::mem::take(&mut *finished.borrow_mut()) {
            if let Ok(info) = registry.info(id) {
                print_channels(&[info], format);
            }
            registry
                .release(id)
                .map_err(|err| channel_error("release failed", err))?;
            closed += 1;
        }

        if args.count.is_some_and(|count| closed >= count) {
            debug!(closed, "connection limit reached");
            break;
        }
    }

    Ok(SUCCESS)
}

fn accept(listener: &UnixSocketListener) -> CliResult<Option<SocketStream>> {
    match listener.accept() {
        Ok(socket) => Ok(Some(socket)),
        Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(err) => Err(transport_error("accept failed", err)),
    }
}

fn open_connection(
    event_loop: &mut EventLoop,
    socket: SocketStream,
    backlog: &Backlog,
    finished: &Rc<RefCell<Vec<ChannelId>>>,
) -> CliResult<()> {
    let registry = event_loop.registry_mut();
    let id = registry
        .open_socket(socket, ChannelOptions::rpc())
        .map_err(|err| channel_error("channel setup failed", err))?;

    registry
        .set_dispatcher(id, ServeDispatcher::new(id, Rc::clone(backlog)))
        .map_err(|err| channel_error("channel setup failed", err))?;

    let done = Rc::clone(finished);
    registry
        .on_exit(id, move |id, status| {
            debug!(channel = %id, status, "connection closed");
            done.borrow_mut().push(id);
        })
        .map_err(|err| channel_error("channel setup failed", err))?;

    event_loop
        .start_io(id)
        .map_err(|err| channel_error("channel io failed", err))?;
    info!(channel = %id, "connection accepted");
    Ok(())
}
