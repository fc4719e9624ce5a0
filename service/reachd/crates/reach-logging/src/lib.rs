//! Structured logging initialisation for Reach services
//!
//! Thin wrapper over `tracing-subscriber` shared by the daemon and its
//! auxiliary binaries:
//!
//! - **Env-filter first**: `RUST_LOG` wins, then the configured level
//! - **Structured format**: JSON lines with RFC 3339 timestamps, or a
//!   compact human format for development
//! - **Optional file sink**: append to a log file instead of stderr
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = reach_config::Config::from_env()?;
//! let _guard = reach_logging::init_logging("reachd", &config.logging)?;
//! tracing::info!("broker starting");
//! ```

use reach_config::LoggingConfig;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub mod error;

pub use error::{LoggingError, LoggingResult};

/// Keeps the logging backend alive; drop at process exit.
///
/// Currently only holds the log file handle, but callers should treat it as
/// opaque so buffered backends can be slotted in later.
pub struct LoggingGuard {
    _file: Option<Arc<std::fs::File>>,
}

/// Install the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls log a warning through the
/// already-installed subscriber and succeed.
pub fn init_logging(service_name: &str, config: &LoggingConfig) -> LoggingResult<LoggingGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let file = match &config.log_file {
        Some(path) => Some(Arc::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| LoggingError::Sink(format!("{}: {err}", path.display())))?,
        )),
        None => None,
    };

    let result = if config.json_format {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_target(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_current_span(false)
            .with_span_list(false);
        match &file {
            Some(f) => builder.with_writer(f.clone()).try_init(),
            None => builder.try_init(),
        }
    } else {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .with_target(true);
        match &file {
            Some(f) => builder.with_writer(f.clone()).try_init(),
            None => builder.try_init(),
        }
    };

    if let Err(err) = result {
        tracing::warn!(
            service = service_name,
            "tracing already initialised, skipping duplicate subscriber: {err}"
        );
    } else {
        tracing::debug!(service = service_name, "logging initialised");
    }

    Ok(LoggingGuard { _file: file })
}
