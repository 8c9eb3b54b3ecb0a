//! Game-session feature client.
//!
//! This crate provides:
//! - GameLift: builds authenticated create-session requests and submits them
//!   to the retrying operation queue
//! - GameLiftClientSettings: retry and timeout tuning, from JSON and `GAMELIFT_*` env vars
//! - SessionManager: identity token and deployment settings provider
//! - HandleRegistry: opaque handles for instances shared across a boundary

mod error;
mod feature;
mod handle;
mod logging;
mod models;
mod session;
mod settings;

pub use error::*;
pub use feature::{default_queue_file, GameLift, GameLiftOptions, GAME_SESSIONS_BUNDLE, STATUS_CREATED};
pub use handle::HandleRegistry;
pub use logging::init_logging;
pub use models::{CreateGameSession, GameSessionResponse};
pub use session::{InMemorySessionManager, SessionManager, SETTING_GAMELIFT_BASE_URL};
pub use settings::{
    GameLiftClientSettings, DEFAULT_CLIENT_TIMEOUT_SECONDS, DEFAULT_MAX_EXPONENTIAL_BACKOFF_THRESHOLD,
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_PAGINATION_SIZE,
    DEFAULT_RETRY_INTERVAL_SECONDS, DEFAULT_RETRY_STRATEGY,
};

/// Registry type for façade instances.
pub type GameLiftHandles = HandleRegistry<GameLift>;
