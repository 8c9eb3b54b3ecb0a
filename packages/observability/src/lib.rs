//! # Observability
//!
//! Logging bootstrap shared by the game-session client crates.
//!
//! Library code only uses `tracing` macros. The host process calls
//! [`init`] or [`init_with_config`] once, which installs:
//!
//! - a JSON-lines file layer (default `~/.gamekit/logs/gamelift.jsonl`)
//! - an optional compact stderr layer
//! - an `EnvFilter` taken from `RUST_LOG`, or the configured default level
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     component: "gamelift".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! tracing::info!("client ready");
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{default_log_path, LogFileWriter};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written into every log line.
    pub component: String,

    /// Default filter directive (e.g. "debug", "info,operation_retry_queue=trace").
    /// `RUST_LOG` takes precedence.
    pub default_level: String,

    /// Log file path. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            component: "gamelift".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with defaults for `component`.
pub fn init(component: &str) -> io::Result<()> {
    init_with_config(LogConfig {
        component: component.into(),
        ..Default::default()
    })
}

/// Initialize logging.
///
/// Fails if the log file cannot be opened. A second call in the same process
/// keeps the subscriber installed first.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);
    let writer = LogFileWriter::new(&log_path)?;

    let json_layer = JsonLayer::new(config.component.clone(), writer);

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer.with_filter(env_filter(&config.default_level)))
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(
            log_path = %log_path.display(),
            component = %config.component,
            "observability initialized"
        );
    }
    Ok(())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, instrument, trace, warn, Level};
