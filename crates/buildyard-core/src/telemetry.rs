//! Tracing initialisation for buildyard binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored,
//! since the global subscriber can only be set once per process.

use std::io;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// * `json`: emit newline-delimited JSON instead of human-readable lines.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// Lines go to stderr; stdout belongs to whatever wraps the binary.
/// Thread ids are shown in plain mode because parallel projects interleave.
pub fn init_tracing(json: bool, level: Level) {
    let layer = fmt::layer().with_writer(io::stderr).with_target(false);
    let registry = tracing_subscriber::registry().with(default_filter(level));
    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer.with_thread_ids(true)).try_init()
    };
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// `RUST_LOG` when set and valid, otherwise `level` for every target.
fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Map a configured log level name to a tracing level.
///
/// Accepts the tracing names plus the legacy syslog-style `notice`,
/// `warning` and `critical`. Case-insensitive.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" | "notice" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" | "critical" => Some(Level::ERROR),
        _ => None,
    }
}
