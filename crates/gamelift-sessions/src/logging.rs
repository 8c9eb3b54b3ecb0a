//! Logging initialization for hosts embedding the game-session client.
//!
//! Wraps the observability crate. Lines go to `~/.gamekit/logs/gamelift.jsonl`
//! unless `GAMELIFT_LOG_PATH` points elsewhere.

use crate::error::GameLiftResult;
use observability::LogConfig;
use std::path::PathBuf;

/// Install the tracing subscriber.
///
/// `level` is the default filter; `RUST_LOG` overrides it. Setting
/// `GAMELIFT_LOG_STDERR=1` mirrors logs to stderr.
///
/// ```ignore
/// gamelift_sessions::init_logging("info")?;
/// ```
pub fn init_logging(level: &str) -> GameLiftResult<()> {
    let also_stderr = std::env::var("GAMELIFT_LOG_STDERR")
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let log_path = std::env::var_os("GAMELIFT_LOG_PATH")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from);

    observability::init_with_config(LogConfig {
        component: "gamelift-sessions".into(),
        default_level: level.into(),
        log_path,
        also_stderr,
    })?;
    Ok(())
}
