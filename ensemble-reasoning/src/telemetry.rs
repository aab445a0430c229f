//! Logging setup
//!
//! Human-readable logs go to stderr (stdout carries MCP JSON-RPC). When a
//! log directory is available, every event, including the session event log
//! on [`SESSION_LOG_TARGET`](crate::engine::SESSION_LOG_TARGET), is also
//! appended as JSON lines to `ensemble-reasoning-<UTC timestamp>.jsonl`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Directive used when no level is configured
pub const DEFAULT_LOG_DIRECTIVE: &str = "ensemble_reasoning=debug,info";

/// Keeps the file writer flushing until dropped
#[derive(Debug)]
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
    log_file: Option<PathBuf>,
}

impl LogGuard {
    /// JSON log file for this process, if file logging is active
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// `ensemble-reasoning-<timestamp>.jsonl`
pub fn log_file_name(now: DateTime<Utc>) -> String {
    format!("ensemble-reasoning-{}.jsonl", now.format("%Y%m%dT%H%M%SZ"))
}

/// Log directory from `ENSEMBLE_LOG_DIR`, `XDG_STATE_HOME` or the home directory
pub fn resolve_log_dir<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = non_empty("ENSEMBLE_LOG_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Some(state) = non_empty("XDG_STATE_HOME") {
        return Some(PathBuf::from(state).join("mcp").join("logs"));
    }
    dirs::state_dir()
        .map(|state| state.join("mcp").join("logs"))
        .or_else(|| {
            dirs::home_dir().map(|home| home.join(".local").join("state").join("mcp").join("logs"))
        })
}

/// Build the filter from an explicit level, `ENSEMBLE_LOG_LEVEL`, or the default
pub fn env_filter(level: Option<&str>) -> EnvFilter {
    let directive = level
        .map(str::to_string)
        .or_else(|| std::env::var("ENSEMBLE_LOG_LEVEL").ok())
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_DIRECTIVE.to_string());
    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("Invalid log directive '{}': {}; using defaults", directive, e);
        EnvFilter::new(DEFAULT_LOG_DIRECTIVE)
    })
}

/// Install the global subscriber. Falls back to stderr only if the log
/// directory cannot be created.
pub fn init_logging(level: Option<&str>, log_dir: Option<PathBuf>) -> LogGuard {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);

    let mut log_file = None;
    let mut guard = None;
    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            eprintln!("Cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        let name = log_file_name(Utc::now());
        let appender = tracing_appender::rolling::never(&dir, &name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        log_file = Some(dir.join(name));
        guard = Some(worker);
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(true)
                .with_target(true),
        )
    });

    // A subscriber may already be installed (tests, embedding hosts)
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    LogGuard {
        _guard: guard,
        log_file,
    }
}
