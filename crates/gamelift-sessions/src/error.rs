//! Error types and stable result codes for the game-session client.

use operation_retry_queue::{AdmissionError, FailureReason, TransportError};
use thiserror::Error;

/// Result code for a call that succeeded.
pub const RESULT_SUCCESS: u32 = 0x0;
pub const RESULT_SETTINGS_FILE_READ_FAILED: u32 = 0x4;
pub const RESULT_SETTINGS_MISSING: u32 = 0x5;
pub const RESULT_NO_ID_TOKEN: u32 = 0x6;
pub const RESULT_INVALID_BASE_URL: u32 = 0x7;
pub const RESULT_MALFORMED_PAYLOAD: u32 = 0x8;
pub const RESULT_REQUEST_QUEUE_FULL: u32 = 0x9;
pub const RESULT_UNHEALTHY_CONNECTION: u32 = 0xA;
pub const RESULT_CLIENT_SHUT_DOWN: u32 = 0xB;
pub const RESULT_HTTP_CLIENT_INIT_FAILED: u32 = 0xC;
pub const RESULT_CREATE_SESSION_FAILED: u32 = 0x10C00;
pub const RESULT_INVALID_HANDLE: u32 = 0x10C01;

/// Errors returned by the game-session façade.
#[derive(Debug, Error)]
pub enum GameLiftError {
    /// Settings file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file or request payload is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session manager has no settings loaded, or the base URL is absent.
    #[error("GameLift settings are missing")]
    SettingsMissing,

    /// No player is logged in.
    #[error("No identity token available")]
    NoIdToken,

    /// The configured base URL does not parse.
    #[error("Invalid GameLift base URL: {0}")]
    InvalidBaseUrl(String),

    /// The HTTP transport could not be built.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The retry queue refused the request.
    #[error("Request not admitted: {0}")]
    Admission(#[from] AdmissionError),

    /// The request was admitted but ended without success.
    #[error("Create game session failed ({reason:?}, status {status:?})")]
    CreateSessionFailed {
        reason: FailureReason,
        /// Last HTTP status received, if any.
        status: Option<u16>,
    },

    /// No instance is registered under the handle.
    #[error("Unknown instance handle: {0}")]
    InvalidHandle(u64),
}

impl GameLiftError {
    /// Stable integer code for callers that cannot carry typed errors.
    pub fn code(&self) -> u32 {
        match self {
            Self::Io(_) => RESULT_SETTINGS_FILE_READ_FAILED,
            Self::Json(_) => RESULT_MALFORMED_PAYLOAD,
            Self::SettingsMissing => RESULT_SETTINGS_MISSING,
            Self::NoIdToken => RESULT_NO_ID_TOKEN,
            Self::InvalidBaseUrl(_) => RESULT_INVALID_BASE_URL,
            Self::Transport(_) => RESULT_HTTP_CLIENT_INIT_FAILED,
            Self::Admission(AdmissionError::QueueFull { .. }) => RESULT_REQUEST_QUEUE_FULL,
            Self::Admission(AdmissionError::UnhealthyConnection) => RESULT_UNHEALTHY_CONNECTION,
            Self::Admission(AdmissionError::ShutDown) => RESULT_CLIENT_SHUT_DOWN,
            Self::CreateSessionFailed { .. } => RESULT_CREATE_SESSION_FAILED,
            Self::InvalidHandle(_) => RESULT_INVALID_HANDLE,
        }
    }
}

/// Result type alias using GameLiftError.
pub type GameLiftResult<T> = Result<T, GameLiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            GameLiftError::SettingsMissing,
            GameLiftError::NoIdToken,
            GameLiftError::InvalidBaseUrl("x".into()),
            GameLiftError::Admission(AdmissionError::QueueFull { capacity: 1 }),
            GameLiftError::Admission(AdmissionError::UnhealthyConnection),
            GameLiftError::Admission(AdmissionError::ShutDown),
            GameLiftError::CreateSessionFailed {
                reason: FailureReason::Rejected,
                status: Some(400),
            },
            GameLiftError::InvalidHandle(7),
            GameLiftError::Transport(TransportError::InvalidRequest("tls".into())),
        ];
        let mut codes: Vec<u32> = errors.iter().map(GameLiftError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&RESULT_SUCCESS));
    }

    #[test]
    fn test_admission_conversion() {
        let error: GameLiftError = AdmissionError::QueueFull { capacity: 4 }.into();
        assert_eq!(error.code(), RESULT_REQUEST_QUEUE_FULL);
        assert!(error.to_string().contains("4 pending"));
    }
}
