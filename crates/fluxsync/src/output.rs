//! Output formatting: plain lines or JSON lines.
//!
//! Streaming commands print one line per event so output can be piped
//! into other tools while the watch is still running.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::Value;

use fluxsync_core::Transfer;
use fluxsync_core::control::State;

use crate::cli::{ColorMode, OutputFormat};

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// How every line of one command is rendered.
#[derive(Debug, Clone)]
pub struct Printer {
    format: OutputFormat,
    color: bool,
}

#[derive(Serialize)]
struct SampleLine<'a> {
    channel: &'a str,
    value: &'a Value,
    received_at: String,
}

#[derive(Serialize)]
struct TransferLine<'a> {
    resource: Option<u32>,
    #[serde(flatten)]
    transfer: &'a Transfer,
    received_at: String,
}

impl Printer {
    pub fn new(format: OutputFormat, color: ColorMode) -> Self {
        Self {
            format,
            color: should_color(color),
        }
    }

    pub fn sample(&self, channel: &str, value: &Value) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Plain => {
                let value = plain_value(value);
                Ok(if self.color {
                    format!("{} {value}", channel.cyan())
                } else {
                    format!("{channel} {value}")
                })
            }
            OutputFormat::Json => serde_json::to_string(&SampleLine {
                channel,
                value,
                received_at: now(),
            }),
        }
    }

    pub fn transfer(&self, transfer: &Transfer) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Plain if self.color && transfer.is_release() => {
                Ok(transfer.to_string().yellow().to_string())
            }
            OutputFormat::Plain => Ok(transfer.to_string()),
            OutputFormat::Json => serde_json::to_string(&TransferLine {
                resource: transfer.resource(),
                transfer,
                received_at: now(),
            }),
        }
    }

    /// One line per held resource in a control-state snapshot.
    pub fn held(&self, state: &State) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Plain => Ok(format!(
                "resource {}: {} ({})",
                state.resource, state.subject.name, state.authority
            )),
            OutputFormat::Json => serde_json::to_string(state),
        }
    }
}

/// Strings print bare; everything else as compact JSON.
fn plain_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Write one line to stdout. A closed pipe ends the command quietly.
pub fn print_line(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()
}
