//! The game-session feature client.

use crate::error::{
    GameLiftError, GameLiftResult, RESULT_CREATE_SESSION_FAILED, RESULT_SUCCESS,
};
use crate::models::{CreateGameSession, GameSessionResponse};
use crate::session::{SessionManager, SETTING_GAMELIFT_BASE_URL};
use crate::settings::GameLiftClientSettings;
use operation_retry_queue::{
    AdmissionError, AuthorizationSetter, ClientConfig, DispatchMode, HttpMethod, HttpRequest,
    HttpTransport, OperationCallbacks, OperationOutcome, OperationType, ReqwestTransport,
    RequestSpec, RetryableHttpClient, Submission,
};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Bundle under which game-session operations are queued.
pub const GAME_SESSIONS_BUNDLE: &str = "game_sessions";

/// Status returned by the service when a session was created.
pub const STATUS_CREATED: u16 = 201;

const QUEUE_FILE_NAME: &str = "gamelift_operations.bin";

/// Default location of the offline operation queue.
pub fn default_queue_file() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("gamekit").join(QUEUE_FILE_NAME))
}

/// Construction options for [`GameLift`].
#[derive(Clone, Default)]
pub struct GameLiftOptions {
    pub settings: GameLiftClientSettings,
    /// Replaces the reqwest transport built from the settings.
    pub transport: Option<Arc<dyn HttpTransport>>,
    /// Enables the on-disk queue. See [`default_queue_file`].
    pub queue_file: Option<PathBuf>,
}

/// Game-session feature client.
///
/// Builds authenticated requests from the session manager's settings and
/// token and hands them to a [`RetryableHttpClient`].
pub struct GameLift {
    session_manager: Arc<dyn SessionManager>,
    settings: RwLock<GameLiftClientSettings>,
    custom_transport: AtomicBool,
    client: RetryableHttpClient,
}

impl GameLift {
    /// Client with default settings and the reqwest transport.
    pub fn new(session_manager: Arc<dyn SessionManager>) -> GameLiftResult<Self> {
        Self::with_options(session_manager, GameLiftOptions::default())
    }

    pub fn with_options(
        session_manager: Arc<dyn SessionManager>,
        options: GameLiftOptions,
    ) -> GameLiftResult<Self> {
        let settings = options.settings.normalized();
        let custom_transport = options.transport.is_some();
        let transport = match options.transport {
            Some(transport) => transport,
            None => build_transport(&settings)?,
        };

        let config = ClientConfig {
            strategy: settings.strategy(),
            max_queue_size: settings.max_queue_size(),
            queue_file: options.queue_file,
            authorization: Some(authorization_setter(session_manager.clone())),
        };
        let client = RetryableHttpClient::start(transport, config);

        info!(?settings, custom_transport, "Game session client instantiated");

        Ok(Self {
            session_manager,
            settings: RwLock::new(settings),
            custom_transport: AtomicBool::new(custom_transport),
            client,
        })
    }

    pub fn client_settings(&self) -> GameLiftClientSettings {
        *self.settings.read()
    }

    /// Apply new settings. Zero fields take their defaults.
    ///
    /// Unless a custom transport was installed, the reqwest transport is
    /// rebuilt with the new timeout.
    pub async fn set_client_settings(&self, settings: GameLiftClientSettings) -> GameLiftResult<()> {
        let settings = settings.normalized();
        let transport = if self.custom_transport.load(Ordering::Acquire) {
            None
        } else {
            Some(build_transport(&settings)?)
        };

        self.client
            .reconfigure(transport, settings.strategy(), settings.max_queue_size())
            .await?;
        *self.settings.write() = settings;

        info!(?settings, "Game session client settings updated");
        Ok(())
    }

    /// Route all further sends through `transport`.
    pub async fn set_http_transport(&self, transport: Arc<dyn HttpTransport>) -> GameLiftResult<()> {
        let settings = self.client_settings();
        self.client
            .reconfigure(Some(transport), settings.strategy(), settings.max_queue_size())
            .await?;
        self.custom_transport.store(true, Ordering::Release);
        Ok(())
    }

    /// Create a game session and wait for the final outcome.
    pub async fn create_game_session(
        &self,
        session: &CreateGameSession,
    ) -> GameLiftResult<GameSessionResponse> {
        let spec = self.create_session_spec(session)?;
        let outcome = match self
            .client
            .make_request(DispatchMode::Sync, spec, OperationCallbacks::new())
            .await?
        {
            Submission::Completed(outcome) => outcome,
            Submission::Pending(rx) => rx.await.map_err(|_| AdmissionError::ShutDown)?,
        };
        into_response(outcome)
    }

    /// Create a game session without waiting.
    ///
    /// `callback` receives a result code and the response body once the
    /// request completes. Errors returned here mean the request never left.
    pub async fn create_game_session_with_callback(
        &self,
        session: &CreateGameSession,
        callback: impl FnOnce(u32, &str) + Send + 'static,
    ) -> GameLiftResult<()> {
        let spec = self.create_session_spec(session)?;
        self.client
            .make_request(DispatchMode::Async, spec, result_code_callbacks(callback))
            .await?;
        Ok(())
    }

    /// Operations admitted but not finished.
    pub fn pending_operations(&self) -> usize {
        self.client.pending_count()
    }

    pub fn is_connection_healthy(&self) -> bool {
        self.client.is_healthy()
    }

    /// Stop the retry worker, persisting queued work if a queue file is set.
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
        info!("Game session client stopped");
    }

    fn create_session_spec(&self, session: &CreateGameSession) -> GameLiftResult<RequestSpec> {
        if !self.session_manager.are_settings_loaded() {
            return Err(GameLiftError::SettingsMissing);
        }

        let base_url = self
            .session_manager
            .client_setting(SETTING_GAMELIFT_BASE_URL)
            .filter(|url| !url.is_empty())
            .ok_or(GameLiftError::SettingsMissing)?;
        let url = Url::parse(&base_url)
            .map_err(|e| GameLiftError::InvalidBaseUrl(format!("{}: {}", base_url, e)))?;

        let token = self.session_manager.current_identity_token();
        if token.is_empty() {
            info!("Create game session skipped, no player is logged in");
            return Err(GameLiftError::NoIdToken);
        }

        let mut request =
            HttpRequest::new(HttpMethod::Post, url.as_str()).with_json_body(&session.to_json()?);
        request.set_bearer_token(&token);

        Ok(RequestSpec::new(
            OperationType::Create,
            GAME_SESSIONS_BUNDLE,
            "",
            request,
            STATUS_CREATED,
            self.client_settings().max_retries,
        ))
    }
}

fn build_transport(settings: &GameLiftClientSettings) -> GameLiftResult<Arc<dyn HttpTransport>> {
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(settings.client_timeout())?);
    Ok(transport)
}

fn authorization_setter(session_manager: Arc<dyn SessionManager>) -> AuthorizationSetter {
    Arc::new(move |request: &mut HttpRequest| {
        let token = session_manager.current_identity_token();
        if token.is_empty() {
            debug!(uri = %request.uri, "No identity token, keeping previous authorization");
            return;
        }
        request.set_bearer_token(&token);
    })
}

fn into_response(outcome: OperationOutcome) -> GameLiftResult<GameSessionResponse> {
    match outcome {
        OperationOutcome::Succeeded(response) => Ok(GameSessionResponse {
            status: response.status,
            body: response.body_text(),
        }),
        OperationOutcome::Failed(failure) => Err(GameLiftError::CreateSessionFailed {
            status: failure.response.as_ref().map(|response| response.status),
            reason: failure.reason,
        }),
    }
}

/// Adapt a `(result_code, body)` callback to operation callbacks.
fn result_code_callbacks(callback: impl FnOnce(u32, &str) + Send + 'static) -> OperationCallbacks {
    let on_success = Arc::new(Mutex::new(Some(callback)));
    let on_failure = on_success.clone();

    let body_of = |outcome: &OperationOutcome| {
        outcome
            .response()
            .map(|response| response.body_text())
            .unwrap_or_default()
    };

    OperationCallbacks::new()
        .on_success(move |outcome| {
            if let Some(callback) = on_success.lock().take() {
                callback(RESULT_SUCCESS, &body_of(outcome));
            }
        })
        .on_failure(move |outcome| {
            if let Some(callback) = on_failure.lock().take() {
                callback(RESULT_CREATE_SESSION_FAILED, &body_of(outcome));
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use operation_retry_queue::{FailureReason, HttpResponse, OperationFailure};

    #[test]
    fn test_success_outcome_maps_to_response() {
        let outcome = OperationOutcome::Succeeded(HttpResponse::new(201).with_body("{}"));
        let response = into_response(outcome).unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, "{}");
    }

    #[test]
    fn test_failure_outcome_keeps_reason_and_status() {
        let outcome = OperationOutcome::Failed(OperationFailure {
            reason: FailureReason::Rejected,
            attempts: 1,
            response: Some(HttpResponse::new(409)),
        });
        match into_response(outcome) {
            Err(GameLiftError::CreateSessionFailed { reason, status }) => {
                assert_eq!(reason, FailureReason::Rejected);
                assert_eq!(status, Some(409));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_result_code_callbacks_fire_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let callbacks = result_code_callbacks(move |code, body| {
            recorded.lock().push((code, body.to_string()));
        });

        let outcome = OperationOutcome::Failed(OperationFailure {
            reason: FailureReason::RetriesExhausted,
            attempts: 3,
            response: Some(HttpResponse::new(503).with_body("busy")),
        });
        if let Some(on_failure) = callbacks.on_failure {
            on_failure(&outcome);
        }

        assert_eq!(
            *calls.lock(),
            vec![(RESULT_CREATE_SESSION_FAILED, "busy".to_string())]
        );
    }

    #[test]
    fn test_default_queue_file_name() {
        if let Some(path) = default_queue_file() {
            assert!(path.ends_with("gamekit/gamelift_operations.bin"));
        }
    }
}
