//! Logging setup and the request-scoped logger.
//!
//! Process-wide output goes through a `tracing` subscriber whose destination is
//! chosen with `--log` and whose filter comes from `TW_LOG`. Request handlers
//! carry a [`Logger`] that stamps every line with its name and request id.

use std::fs::OpenOptions;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable holding the `tracing` filter directives.
pub const LOG_FILTER_ENV: &str = "TW_LOG";

/// Build the filter from `TW_LOG`, falling back to `info` (or `debug` when verbose).
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    })
}

/// Install the global subscriber.
///
/// `dest` is `0`/`off`, `1`/`stdout`, `2`/`stderr`, or a file path (appended, no ANSI).
pub fn init(dest: &str, verbose: bool) -> anyhow::Result<()> {
    match dest {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(verbose))
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(verbose))
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(env_filter(verbose))
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique request id.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Logger carried through a request (or a detached background job).
#[derive(Debug, Clone, Default)]
pub struct Logger {
    name: Option<String>,
    request_id: Option<u64>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_request_id(mut self, id: u64) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn request_id(&self) -> Option<u64> {
        self.request_id
    }

    pub fn log(&self, level: Level, message: &str) {
        let name = self.name.as_deref().unwrap_or("-");
        let request_id = self.request_id.unwrap_or(0);
        match level {
            Level::ERROR => tracing::error!(logger = name, request_id, "{}", message),
            Level::WARN => tracing::warn!(logger = name, request_id, "{}", message),
            Level::INFO => tracing::info!(logger = name, request_id, "{}", message),
            Level::DEBUG => tracing::debug!(logger = name, request_id, "{}", message),
            Level::TRACE => tracing::trace!(logger = name, request_id, "{}", message),
        }
    }

    pub fn debug(&self, msg: &str) {
        self.log(Level::DEBUG, msg);
    }

    pub fn info(&self, msg: &str) {
        self.log(Level::INFO, msg);
    }

    pub fn warning(&self, msg: &str) {
        self.log(Level::WARN, msg);
    }

    pub fn error(&self, msg: &str) {
        self.log(Level::ERROR, msg);
    }
}
