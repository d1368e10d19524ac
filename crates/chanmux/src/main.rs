mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "chanmux", version, about = "Multiplexed process, pty and socket channels")]
struct Cli {
    /// Output format for results and summaries.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "CHANMUX_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_trailing_command() {
        let cli = Cli::try_parse_from(["chanmux", "run", "--buffered", "ls", "-la", "/tmp"])
            .expect("run args should parse");

        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert!(args.buffered);
        assert_eq!(args.command, vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn run_requires_a_command() {
        let err = Cli::try_parse_from(["chanmux", "run"]).expect_err("missing command should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn pty_size_requires_pty() {
        let err = Cli::try_parse_from(["chanmux", "run", "--rows", "40", "sh"])
            .expect_err("--rows without --pty should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_call_with_params() {
        let cli = Cli::try_parse_from([
            "chanmux",
            "--format",
            "json",
            "call",
            "/tmp/test.sock",
            "echo",
            "--params",
            "[1,2]",
            "--timeout",
            "3s",
        ])
        .expect("call args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        let Command::Call(args) = cli.command else {
            panic!("expected call command");
        };
        assert_eq!(args.method, "echo");
        assert_eq!(args.params.as_deref(), Some("[1,2]"));
    }

    #[test]
    fn notify_conflicts_with_timeout() {
        let err = Cli::try_parse_from([
            "chanmux",
            "call",
            "/tmp/test.sock",
            "log",
            "--notify",
            "--timeout",
            "1s",
        ])
        .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from(["chanmux", "serve", "/tmp/test.sock", "--count", "2"])
            .expect("serve args should parse");
        assert!(matches!(cli.command, Command::Serve(_)));
    }
}
