//! Create-session flow against a scripted transport.

use async_trait::async_trait;
use gamelift_sessions::{
    CreateGameSession, GameLift, GameLiftClientSettings, GameLiftError, GameLiftHandles,
    GameLiftOptions, InMemorySessionManager, RESULT_CREATE_SESSION_FAILED, RESULT_NO_ID_TOKEN,
    RESULT_SETTINGS_MISSING, RESULT_SUCCESS,
};
use operation_retry_queue::{
    FailureReason, HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError,
    HEADER_AUTHORIZATION, HEADER_CONTENT_TYPE,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const BASE_URL: &str = "https://sessions.example.com/gamesession";

type Responder = Box<dyn Fn(usize) -> Result<HttpResponse, TransportError> + Send + Sync>;

struct MockTransport {
    responder: Responder,
    sent: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    fn new(
        responder: impl Fn(usize) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn created() -> Arc<Self> {
        Self::new(|_| Ok(HttpResponse::new(201).with_body(r#"{"gameSessionId":"gs-1"}"#)))
    }

    fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let index = {
            let mut sent = self.sent.lock();
            sent.push(request.clone());
            sent.len() - 1
        };
        (self.responder)(index)
    }
}

fn logged_in() -> Arc<InMemorySessionManager> {
    let manager = InMemorySessionManager::with_base_url(BASE_URL);
    manager.set_token("id-token-1");
    Arc::new(manager)
}

fn fast_settings() -> GameLiftClientSettings {
    GameLiftClientSettings {
        retry_strategy: 1,
        retry_interval_seconds: 1,
        max_retries: 2,
        ..Default::default()
    }
}

fn feature(
    manager: Arc<InMemorySessionManager>,
    transport: Arc<MockTransport>,
) -> GameLift {
    GameLift::with_options(
        manager,
        GameLiftOptions {
            settings: fast_settings(),
            transport: Some(transport),
            queue_file: None,
        },
    )
    .unwrap()
}

fn session() -> CreateGameSession {
    CreateGameSession::new()
        .with_property("map", "arena")
        .with_property("maxPlayers", "8")
}

#[tokio::test]
async fn test_create_session_sends_authenticated_post() {
    let transport = MockTransport::created();
    let gamelift = feature(logged_in(), transport.clone());

    let response = gamelift.create_game_session(&session()).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.json().unwrap()["gameSessionId"], "gs-1");

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    let request = &sent[0];
    assert_eq!(request.method, HttpMethod::Post);
    assert_eq!(request.uri, BASE_URL);
    assert_eq!(request.header(HEADER_AUTHORIZATION), Some("Bearer id-token-1"));
    assert_eq!(request.header(HEADER_CONTENT_TYPE), Some("application/json"));

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["map"], "arena");
    assert_eq!(body["maxPlayers"], "8");

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_missing_token_never_reaches_transport() {
    let manager = Arc::new(InMemorySessionManager::with_base_url(BASE_URL));
    let transport = MockTransport::created();
    let gamelift = feature(manager, transport.clone());

    let error = gamelift.create_game_session(&session()).await.unwrap_err();
    assert!(matches!(error, GameLiftError::NoIdToken));
    assert_eq!(error.code(), RESULT_NO_ID_TOKEN);
    assert!(transport.sent().is_empty());
    assert_eq!(gamelift.pending_operations(), 0);

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_settings_must_be_loaded() {
    let manager = Arc::new(InMemorySessionManager::new());
    manager.set_token("id-token-1");
    let transport = MockTransport::created();
    let gamelift = feature(manager, transport.clone());

    let error = gamelift.create_game_session(&session()).await.unwrap_err();
    assert_eq!(error.code(), RESULT_SETTINGS_MISSING);
    assert!(transport.sent().is_empty());

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_invalid_base_url() {
    let manager = Arc::new(InMemorySessionManager::with_base_url("not a url"));
    manager.set_token("id-token-1");
    let gamelift = feature(manager, MockTransport::created());

    let error = gamelift.create_game_session(&session()).await.unwrap_err();
    assert!(matches!(error, GameLiftError::InvalidBaseUrl(_)));

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_rejected_create_reports_status() {
    let transport = MockTransport::new(|_| Ok(HttpResponse::new(400).with_body("bad request")));
    let gamelift = feature(logged_in(), transport.clone());

    match gamelift.create_game_session(&session()).await {
        Err(GameLiftError::CreateSessionFailed { reason, status }) => {
            assert_eq!(reason, FailureReason::Rejected);
            assert_eq!(status, Some(400));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(transport.sent().len(), 1);

    gamelift.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_use_max_retries() {
    let transport = MockTransport::new(|_| Ok(HttpResponse::new(503)));
    let gamelift = feature(logged_in(), transport.clone());

    match gamelift.create_game_session(&session()).await {
        Err(GameLiftError::CreateSessionFailed { reason, status }) => {
            assert_eq!(reason, FailureReason::RetriesExhausted);
            assert_eq!(status, Some(503));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    // max_retries = 2: the first send plus two retries.
    assert_eq!(transport.sent().len(), 3);

    gamelift.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_carries_refreshed_token() {
    let manager = logged_in();
    let refresher = manager.clone();
    let transport = MockTransport::new(move |index| {
        if index == 0 {
            refresher.set_token("id-token-2");
            Ok(HttpResponse::new(503))
        } else {
            Ok(HttpResponse::new(201))
        }
    });
    let gamelift = feature(manager, transport.clone());

    assert!(gamelift.create_game_session(&session()).await.is_ok());

    let tokens: Vec<Option<String>> = transport
        .sent()
        .iter()
        .map(|request| request.header(HEADER_AUTHORIZATION).map(str::to_string))
        .collect();
    assert_eq!(
        tokens,
        vec![
            Some("Bearer id-token-1".to_string()),
            Some("Bearer id-token-2".to_string()),
        ]
    );

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_callback_receives_result_code_and_body() {
    let transport = MockTransport::created();
    let gamelift = feature(logged_in(), transport.clone());

    let (tx, rx) = tokio::sync::oneshot::channel();
    gamelift
        .create_game_session_with_callback(&session(), move |code, body| {
            let _ = tx.send((code, body.to_string()));
        })
        .await
        .unwrap();

    let (code, body) = rx.await.unwrap();
    assert_eq!(code, RESULT_SUCCESS);
    assert_eq!(body, r#"{"gameSessionId":"gs-1"}"#);

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_callback_is_not_called_when_not_admitted() {
    let manager = Arc::new(InMemorySessionManager::with_base_url(BASE_URL));
    let gamelift = feature(manager, MockTransport::created());

    let result = gamelift
        .create_game_session_with_callback(&session(), |_, _| panic!("must not be called"))
        .await;
    assert!(matches!(result, Err(GameLiftError::NoIdToken)));

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_settings_update_keeps_custom_transport() {
    let transport = MockTransport::created();
    let gamelift = feature(logged_in(), transport.clone());

    gamelift
        .set_client_settings(GameLiftClientSettings {
            max_retry_queue_size: 0,
            retry_strategy: 9,
            pagination_size: 25,
            ..Default::default()
        })
        .await
        .unwrap();

    let settings = gamelift.client_settings();
    assert_eq!(settings.max_retry_queue_size, 256);
    assert_eq!(settings.retry_strategy, 0);
    assert_eq!(settings.pagination_size, 25);

    assert!(gamelift.create_game_session(&session()).await.is_ok());
    assert_eq!(transport.sent().len(), 1);

    gamelift.shutdown().await;
}

#[tokio::test]
async fn test_set_http_transport_redirects_sends() {
    let first = MockTransport::created();
    let second = MockTransport::created();
    let gamelift = feature(logged_in(), first.clone());

    gamelift.set_http_transport(second.clone()).await.unwrap();
    assert!(gamelift.create_game_session(&session()).await.is_ok());

    assert!(first.sent().is_empty());
    assert_eq!(second.sent().len(), 1);

    gamelift.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_offline_create_is_persisted_on_shutdown() {
    let dir = tempdir().unwrap();
    let queue_file = dir.path().join("operations.bin");
    let offline = MockTransport::new(|_| Err(TransportError::Connection("offline".to_string())));

    let gamelift = GameLift::with_options(
        logged_in(),
        GameLiftOptions {
            settings: GameLiftClientSettings {
                max_retries: 32,
                ..fast_settings()
            },
            transport: Some(offline.clone()),
            queue_file: Some(queue_file.clone()),
        },
    )
    .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    gamelift
        .create_game_session_with_callback(&session(), move |code, _| {
            let _ = tx.send(code);
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!gamelift.is_connection_healthy());
    assert_eq!(gamelift.pending_operations(), 1);

    gamelift.shutdown().await;
    assert_eq!(rx.await.unwrap(), RESULT_CREATE_SESSION_FAILED);
    assert!(std::fs::metadata(&queue_file).unwrap().len() > 0);
}

#[tokio::test]
async fn test_handle_registry_owns_instances() {
    let handles = GameLiftHandles::new();
    let handle = handles.insert(feature(logged_in(), MockTransport::created()));

    let gamelift = handles.require(handle).unwrap();
    assert!(gamelift.create_game_session(&session()).await.is_ok());

    let released = handles.release(handle).unwrap();
    released.shutdown().await;
    assert!(handles.release(handle).is_none());
    assert!(handles.require(handle).is_err());
}
