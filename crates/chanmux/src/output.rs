use std::io::{IsTerminal, Write};

use chanmux_channel::ChannelInfo;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    method: &'a str,
    request_id: u64,
    result: &'a Value,
}

/// One compact JSON document per line.
fn json_line(value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!(error = %err, "output not serializable"),
    }
}

fn table_with<const N: usize>(header: [&str; N]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}

pub fn print_call_result(method: &str, request_id: u64, result: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => json_line(&CallOutput {
            method,
            request_id,
            result,
        }),
        OutputFormat::Table => {
            let mut table = table_with(["METHOD", "ID", "RESULT"]);
            table.add_row(vec![method.to_string(), request_id.to_string(), result.to_string()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let body = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
            println!("{method} (#{request_id}) =>\n{body}");
        }
        OutputFormat::Raw => match result {
            Value::String(text) => print_raw(text.as_bytes()),
            other => print_raw(other.to_string().as_bytes()),
        },
    }
}

/// Channel summaries. Json and Raw both print one object per line.
pub fn print_channels(channels: &[ChannelInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => channels.iter().for_each(json_line),
        OutputFormat::Table => {
            let mut table = table_with(["ID", "KIND", "MODE", "PID", "REFS", "PENDING", "EXIT"]);
            for info in channels {
                table.add_row(vec![
                    info.id.to_string(),
                    info.kind.to_string(),
                    info.mode.to_string(),
                    optional(info.pid),
                    info.refcount.to_string(),
                    info.pending_calls.to_string(),
                    optional(info.exit_status),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for info in channels {
                println!(
                    "channel {} ({} {}) pid={} refs={} pending={} exit={}",
                    info.id,
                    info.kind,
                    info.mode,
                    optional(info.pid),
                    info.refcount,
                    info.pending_calls,
                    optional(info.exit_status),
                );
            }
        }
    }
}

/// Write bytes to stdout untouched. Failures (a closed pipe) are ignored.
pub fn print_raw(data: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(data).and_then(|()| stdout.flush());
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
