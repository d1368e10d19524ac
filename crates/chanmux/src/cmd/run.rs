use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chanmux_channel::{ChannelId, ChannelOptions, EventLoop, Part};
use chanmux_transport::{ProcessSpawner, PtySize};
use tracing::{debug, info};

use crate::cmd::{interrupt_flag, RunArgs};
use crate::exit::{channel_error, child_code, CliError, CliResult, USAGE};
use crate::output::{print_channels, print_raw, OutputFormat};

const TICK: Duration = Duration::from_millis(100);

/// Host stdin relayed to the command through a stdio channel.
struct Forward {
    id: ChannelId,
    pending: Rc<RefCell<Vec<u8>>>,
    done: bool,
}

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| CliError::new(USAGE, "missing command"))?;
    let spawner = ProcessSpawner::new(program).args(rest);
    let options = ChannelOptions {
        stdout_buffered: args.buffered,
        stderr_buffered: args.buffered,
        ..ChannelOptions::default()
    };

    let mut event_loop = EventLoop::new();
    let registry = event_loop.registry_mut();
    let spawned = if args.pty {
        let size = PtySize {
            rows: args.rows,
            cols: args.cols,
        };
        registry.spawn_pty(&spawner, size, options)
    } else {
        registry.spawn(&spawner, options)
    };
    let id = spawned.map_err(|err| channel_error("spawn failed", err))?;

    registry
        .on_stdout(id, print_raw)
        .map_err(|err| channel_error("channel setup failed", err))?;
    registry
        .on_stderr(id, |data| {
            let mut err = std::io::stderr();
            let _ = err.write_all(data);
            let _ = err.flush();
        })
        .map_err(|err| channel_error("channel setup failed", err))?;
    event_loop
        .start_io(id)
        .map_err(|err| channel_error("channel io failed", err))?;

    let mut forward = if args.stdin {
        Some(open_forward(&mut event_loop)?)
    } else {
        if !args.pty {
            close_stdin(&mut event_loop, id)?;
        }
        None
    };
    info!(channel = %id, command = %spawner.display(), pty = args.pty, "command started");

    let running = interrupt_flag()?;
    let mut stopping = false;
    let status = loop {
        event_loop.run_once(TICK);

        if let Some(forward) = forward.as_mut() {
            relay_input(&mut event_loop, id, forward, args.pty)?;
        }

        let registry = event_loop.registry_mut();
        if let Some(status) = registry
            .exit_status(id)
            .map_err(|err| channel_error("channel lookup failed", err))?
        {
            break status;
        }
        if !running.load(Ordering::SeqCst) && !stopping {
            stopping = true;
            debug!(channel = %id, "interrupted; stopping command");
            registry
                .stop(id)
                .map_err(|err| channel_error("stop failed", err))?;
        }
    };

    let registry = event_loop.registry_mut();
    if args.summary {
        let info = registry
            .info(id)
            .map_err(|err| channel_error("channel lookup failed", err))?;
        print_channels(&[info], format);
    }
    registry
        .release(id)
        .map_err(|err| channel_error("release failed", err))?;
    Ok(child_code(status))
}

fn open_forward(event_loop: &mut EventLoop) -> CliResult<Forward> {
    let registry = event_loop.registry_mut();
    let id = registry
        .open_stdio(ChannelOptions::default())
        .map_err(|err| channel_error("stdin setup failed", err))?;
    let pending = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&pending);
    registry
        .on_stdout(id, move |data| sink.borrow_mut().extend_from_slice(data))
        .map_err(|err| channel_error("stdin setup failed", err))?;
    event_loop
        .start_io(id)
        .map_err(|err| channel_error("stdin setup failed", err))?;
    Ok(Forward {
        id,
        pending,
        done: false,
    })
}

fn relay_input(
    event_loop: &mut EventLoop,
    id: ChannelId,
    forward: &mut Forward,
    pty: bool,
) -> CliResult<()> {
    let data = std::mem::take(&mut *forward.pending.borrow_mut());
    let registry = event_loop.registry_mut();
    if !data.is_empty() && registry.exit_status(id).ok().flatten().is_none() {
        if let Err(err) = registry.send(id, &data) {
            debug!(channel = %id, error = %err, "input dropped");
        }
    }

    let ended = registry.exit_status(forward.id).ok().flatten().is_some();
    if ended && !forward.done {
        forward.done = true;
        debug!(channel = %id, "host stdin ended");
        if !pty {
            close_stdin(event_loop, id)?;
        }
    }
    Ok(())
}

fn close_stdin(event_loop: &mut EventLoop, id: ChannelId) -> CliResult<()> {
    event_loop
        .registry_mut()
        .close_part(id, Part::Stdin)
        .map_err(|err| channel_error("closing stdin failed", err))
}
