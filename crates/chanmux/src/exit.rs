use std::fmt;
use std::io;

use chanmux_channel::ChannelError;
use chanmux_frame::FrameError;
use chanmux_rpc::{CallError, RpcError};
use chanmux_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failure on its way out of the process, with the exit code to report.
#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn context(code: i32, context: &str, err: impl fmt::Display) -> Self {
        Self::new(code, format!("{context}: {err}"))
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

/// Exit code for a finished child: its own code when it fits, else FAILURE.
pub fn child_code(status: i32) -> i32 {
    u8::try_from(status).map_or(FAILURE, i32::from)
}

fn io_code(kind: io::ErrorKind) -> i32 {
    use io::ErrorKind::*;
    match kind {
        PermissionDenied => PERMISSION_DENIED,
        TimedOut | WouldBlock => TIMEOUT,
        NotFound | ConnectionRefused | ConnectionReset | BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::context(io_code(err.kind()), context, err)
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Spawn { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_code(source.kind()),
        TransportError::PathTooLong { .. } => USAGE,
        _ => TRANSPORT_ERROR,
    };
    CliError::context(code, context, err)
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    let code = match &err {
        FrameError::Io(source) => io_code(source.kind()),
        FrameError::ConnectionClosed => TRANSPORT_ERROR,
        _ => DATA_INVALID,
    };
    CliError::context(code, context, err)
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::Frame(err) => frame_error(context, err),
        RpcError::ChannelClosed => CliError::context(TRANSPORT_ERROR, context, err),
        other => CliError::context(INTERNAL, context, other),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::Rpc(err) => rpc_error(context, err),
        ChannelError::Frame(err) => frame_error(context, err),
        ChannelError::Io(err) => io_error(context, err),
        ChannelError::Closed(_) => CliError::context(TRANSPORT_ERROR, context, err),
        ChannelError::StdioInUse(_)
        | ChannelError::InvalidPart { .. }
        | ChannelError::WrongKind { .. } => CliError::context(USAGE, context, err),
        other => CliError::context(INTERNAL, context, other),
    }
}

pub fn call_error(method: &str, err: CallError) -> CliError {
    let context = format!("call '{method}' failed");
    match err {
        CallError::ChannelClosed => CliError::context(
            TRANSPORT_ERROR,
            &context,
            "channel closed before the response",
        ),
        CallError::Remote(value) => CliError::context(FAILURE, &context, value),
    }
}
