//! Logger setup with aligned human output and an optional JSON mode.
//!
//! Environment variables:
//!
//! - `ROUTED_LOG_LEVEL`: level filter (default `info`)
//! - `ROUTED_LOG_FORMAT`: `human` (default) or `json`
//! - `RUST_LOG`: standard filter override
//! - `NO_COLOR`: disables ANSI colors in human output

use chrono::Local;
use env_logger::Builder;
use log::{Level, LevelFilter, Record};
use serde_json::json;
use std::env;
use std::io::Write;

const LEVEL_FIELD_WIDTH: usize = 8;
const FILE_LINE_FIELD_WIDTH: usize = 22;

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m",
        Level::Warn => "\x1b[33m",
        Level::Info => "\x1b[32m",
        Level::Debug => "\x1b[34m",
        Level::Trace => "\x1b[35m",
    }
}

fn pad(width: usize, used: usize) -> String {
    " ".repeat(width.saturating_sub(used).max(1))
}

fn human_line(record: &Record, no_color: bool) -> String {
    let level_plain = record.level().to_string();
    let level_display = if no_color {
        format!("[{}]", level_plain)
    } else {
        format!("[{}{}\x1b[39m]", level_color(record.level()), level_plain)
    };
    // Visible width ignores the ANSI escapes around the level word.
    let level_visible = level_plain.len() + 2;

    let file_line = format!(
        "{}:{}",
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0)
    );

    let (prefix, suffix) = if no_color { ("", "") } else { ("\x1b[1m", "\x1b[0m") };
    format!(
        "{}{} | {}{}| {}{}| {}{}",
        prefix,
        Local::now().format("%b %d %y %I:%M:%S %p"),
        level_display,
        pad(LEVEL_FIELD_WIDTH, level_visible),
        file_line,
        pad(FILE_LINE_FIELD_WIDTH, file_line.len()),
        record.args(),
        suffix,
    )
}

fn json_line(record: &Record) -> String {
    let entry = json!({
        "@timestamp": chrono::Utc::now().to_rfc3339(),
        "level": record.level().to_string().to_lowercase(),
        "message": record.args().to_string(),
        "target": record.target(),
        "file": record.file(),
        "line": record.line(),
        "service": "routed",
        "version": env!("CARGO_PKG_VERSION"),
    });
    entry.to_string()
}

/// Configures the process logger. Call once at startup.
pub fn configure_logger() {
    let no_color = env::var("NO_COLOR").is_ok();
    let format = env::var("ROUTED_LOG_FORMAT")
        .unwrap_or_else(|_| "human".to_string())
        .to_lowercase();
    let level = match env::var("ROUTED_LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let mut builder = Builder::new();
    builder.filter_level(level);
    if let Ok(rust_log) = env::var("RUST_LOG") {
        builder.parse_filters(&rust_log);
    }

    if format == "json" {
        builder.format(|buf, record| writeln!(buf, "{}", json_line(record)));
    } else {
        builder.format(move |buf, record| writeln!(buf, "{}", human_line(record, no_color)));
    }

    // A host may have installed its own logger already; that is fine.
    let _ = builder.try_init();
}
