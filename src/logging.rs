//! Diagnostic logging via `tracing` + `tracing-subscriber`.
//!
//! Level priority:
//! 1. `--verbose` (debug)
//! 2. `ALLORUN_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `warn`, so node output on stdout stays readable

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::fmt;

const LOG_ENV: &str = "ALLORUN_LOG";

/// Installs the global subscriber. Call once at startup.
pub fn init_logging(verbose: bool) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let level = select_level(verbose, env.as_deref());

    fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

fn select_level(verbose: bool, env: Option<&str>) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    env.and_then(parse_level).unwrap_or(Level::WARN)
}

fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
