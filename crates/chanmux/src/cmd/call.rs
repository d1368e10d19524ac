use std::time::Duration;

use chanmux_channel::{ChannelOptions, EventLoop, Part};
use chanmux_frame::params_array;
use chanmux_transport::SocketStream;
use serde_json::Value;
use tracing::debug;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{
    call_error, channel_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT,
    USAGE,
};
use crate::output::{print_call_result, OutputFormat};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let params = parse_params(args.params.as_deref())?;
    let timeout = match args.timeout.as_deref() {
        Some(input) => parse_duration(input)?,
        None => DEFAULT_TIMEOUT,
    };

    let socket = SocketStream::connect_unix(&args.path)
        .map_err(|err| transport_error("connect failed", err))?;
    let mut event_loop = EventLoop::new();
    let id = event_loop
        .registry_mut()
        .open_socket(socket, ChannelOptions::rpc())
        .map_err(|err| channel_error("channel setup failed", err))?;
    event_loop
        .start_io(id)
        .map_err(|err| channel_error("channel io failed", err))?;

    if args.notify {
        event_loop
            .registry_mut()
            .send_notification(id, &args.method, params)
            .map_err(|err| channel_error("notify failed", err))?;
        debug!(method = %args.method, "notification sent");
        return finish(&mut event_loop, id).map(|()| SUCCESS);
    }

    let mut call = event_loop
        .registry_mut()
        .send_request(id, &args.method, params)
        .map_err(|err| channel_error("request failed", err))?;
    if !event_loop.run_until(timeout, |_| call.is_resolved()) {
        return Err(CliError::new(
            TIMEOUT,
            format!("no response to '{}' within {timeout:?}", args.method),
        ));
    }

    let request_id = call.id();
    let result = match call.into_result() {
        Some(Ok(result)) => result,
        Some(Err(err)) => return Err(call_error(&args.method, err)),
        None => return Err(CliError::new(INTERNAL, "call resolved without an outcome")),
    };
    print_call_result(&args.method, request_id, &result, format);
    finish(&mut event_loop, id).map(|()| SUCCESS)
}

fn finish(event_loop: &mut EventLoop, id: chanmux_channel::ChannelId) -> CliResult<()> {
    let registry = event_loop.registry_mut();
    registry
        .close_part(id, Part::All)
        .and_then(|()| registry.release(id))
        .map(|_| ())
        .map_err(|err| channel_error("close failed", err))
}

fn parse_params(input: Option<&str>) -> CliResult<Value> {
    let Some(input) = input else {
        return Ok(Value::Array(Vec::new()));
    };
    let value: Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("--params is not valid JSON: {err}")))?;
    Ok(params_array(value))
}
