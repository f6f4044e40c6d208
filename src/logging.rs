// src/logging.rs

//! Logging setup for `phyloflow` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `PHYLOFLOW_LOG` environment variable (e.g. "info", "debug")
//! 2. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for whatever the
//! embedding application prints.

use anyhow::Result;
use tracing_subscriber::fmt;

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging() -> Result<()> {
    let level = std::env::var("PHYLOFLOW_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(tracing::Level::INFO);

    // Send logs to stderr; keep stdout free for the embedder.
    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
