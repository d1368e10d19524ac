use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod run;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command on a channel and relay its output.
    Run(RunArgs),
    /// Send one RPC request over a Unix socket and print the result.
    Call(CallArgs),
    /// Serve RPC channels on a Unix socket.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the command to a pseudo-terminal.
    #[arg(long)]
    pub pty: bool,
    /// Terminal rows when --pty is set.
    #[arg(long, default_value_t = 24, requires = "pty")]
    pub rows: u16,
    /// Terminal columns when --pty is set.
    #[arg(long, default_value_t = 80, requires = "pty")]
    pub cols: u16,
    /// Relay output once, after the command's streams end.
    #[arg(long)]
    pub buffered: bool,
    /// Forward this process's stdin to the command.
    #[arg(long)]
    pub stdin: bool,
    /// Print a channel summary after the command exits.
    #[arg(long)]
    pub summary: bool,
    /// Command and arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Method name.
    pub method: String,
    /// Parameters as JSON. Non-array values are wrapped in an array.
    #[arg(long, short = 'p')]
    pub params: Option<String>,
    /// Send a notification and do not wait for a result.
    #[arg(long, conflicts_with = "timeout")]
    pub notify: bool,
    /// Maximum time to wait for the response (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after this many connections have closed.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s`, or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    const UNITS: [(&str, fn(u64) -> Duration); 2] =
        [("ms", Duration::from_millis), ("s", Duration::from_secs)];

    let text = input.trim();
    let (digits, unit) = UNITS
        .iter()
        .find_map(|(suffix, unit)| text.strip_suffix(*suffix).map(|digits| (digits, *unit)))
        .unwrap_or((text, Duration::from_secs as fn(u64) -> Duration));

    match digits.parse::<u64>() {
        Ok(0) => Err(CliError::new(USAGE, format!("timeout must be positive: {input:?}"))),
        Ok(value) => Ok(unit(value)),
        Err(_) => Err(CliError::new(USAGE, format!("not a duration: {input:?}"))),
    }
}

/// Flag cleared by Ctrl-C.
pub(crate) fn interrupt_flag() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}
