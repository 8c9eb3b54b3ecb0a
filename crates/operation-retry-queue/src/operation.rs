//! Queued operations and their completion bookkeeping.

use crate::request::{HttpRequest, HttpResponse};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// `max_attempts` value meaning "retry for as long as failures are transient".
pub const OPERATION_ATTEMPTS_NO_LIMIT: u32 = 0;

/// Last timestamp handed out in this process (milliseconds since epoch).
static LAST_TIMESTAMP_MS: AtomicI64 = AtomicI64::new(0);

/// Kind of outbound call. Drives retry eligibility and queue collapsing.
///
/// Discriminants are part of the persisted format and must never change.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Create = 0,
    Read = 1,
    Update = 2,
    Delete = 3,
    Write = 4,
    Get = 5,
}

impl OperationType {
    /// Convert from the persisted integer value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Create),
            1 => Some(Self::Read),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            4 => Some(Self::Write),
            5 => Some(Self::Get),
            _ => None,
        }
    }

    /// Pure reads are never retried and never queued on a bad connection.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read | Self::Get)
    }
}

/// Why an operation ended without success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Transient failures continued past `max_attempts`.
    RetriesExhausted,
    /// The server answered with a status that will not improve on retry.
    Rejected,
    /// A read failed transiently; reads are re-issued by callers, not replayed.
    ReadNotRetried,
    /// The transport could not build or send the request.
    Malformed(String),
    /// A newer queued operation made this one redundant.
    Superseded,
    /// The client stopped before the operation finished.
    Shutdown { persisted: bool },
}

/// Terminal failure details handed to failure callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub reason: FailureReason,
    /// Sends performed before giving up.
    pub attempts: u32,
    /// Last response received, if the server answered at all.
    pub response: Option<HttpResponse>,
}

/// Final result of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded(HttpResponse),
    Failed(OperationFailure),
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// The last response seen, successful or not.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Succeeded(response) => Some(response),
            Self::Failed(failure) => failure.response.as_ref(),
        }
    }
}

/// Completion hook. Any caller context is captured by the closure itself.
pub type ResponseCallback = Box<dyn FnOnce(&OperationOutcome) + Send + 'static>;

/// Caller-owned success/failure hooks for one operation.
#[derive(Default)]
pub struct OperationCallbacks {
    pub on_success: Option<ResponseCallback>,
    pub on_failure: Option<ResponseCallback>,
}

impl OperationCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, callback: impl FnOnce(&OperationOutcome) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_failure(mut self, callback: impl FnOnce(&OperationOutcome) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }
}

/// One pending outbound call plus its retry bookkeeping.
pub struct Operation {
    op_type: OperationType,
    bundle: String,
    item_key: String,
    unique_key: String,
    request: HttpRequest,
    expected_success_code: u16,
    max_attempts: u32,
    timestamp_ms: i64,
    /// Sends performed so far.
    pub(crate) attempts: u32,
    /// Set by the queue filter when a newer operation supersedes this one.
    pub(crate) discard: bool,
    /// Earliest instant of the next send.
    pub(crate) not_before: Option<Instant>,
    callbacks: OperationCallbacks,
    result_tx: Option<oneshot::Sender<OperationOutcome>>,
}

impl Operation {
    /// Create an operation stamped with the next process-wide timestamp.
    pub fn new(
        op_type: OperationType,
        bundle: impl Into<String>,
        item_key: impl Into<String>,
        request: HttpRequest,
        expected_success_code: u16,
        max_attempts: u32,
    ) -> Self {
        Self::with_timestamp(
            op_type,
            bundle,
            item_key,
            request,
            expected_success_code,
            max_attempts,
            next_timestamp_ms(),
        )
    }

    /// Create an operation with an explicit creation timestamp (used on load).
    pub fn with_timestamp(
        op_type: OperationType,
        bundle: impl Into<String>,
        item_key: impl Into<String>,
        request: HttpRequest,
        expected_success_code: u16,
        max_attempts: u32,
        timestamp_ms: i64,
    ) -> Self {
        let bundle = bundle.into();
        let item_key = item_key.into();
        let unique_key = if item_key.is_empty() {
            bundle.clone()
        } else {
            format!("{}{}", bundle, item_key)
        };

        Self {
            op_type,
            bundle,
            item_key,
            unique_key,
            request,
            expected_success_code,
            max_attempts,
            timestamp_ms,
            attempts: 0,
            discard: false,
            not_before: None,
            callbacks: OperationCallbacks::default(),
            result_tx: None,
        }
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    pub fn item_key(&self) -> &str {
        &self.item_key
    }

    /// Identity used for collapsing: the bundle, or bundle + item key.
    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    pub fn expected_success_code(&self) -> u16 {
        self.expected_success_code
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_discarded(&self) -> bool {
        self.discard
    }

    /// True once `attempts` went past a finite `max_attempts`.
    pub fn attempts_exhausted(&self) -> bool {
        self.max_attempts != OPERATION_ATTEMPTS_NO_LIMIT && self.attempts > self.max_attempts
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub(crate) fn set_callbacks(&mut self, callbacks: OperationCallbacks) {
        self.callbacks = callbacks;
    }

    /// Attach a result channel and return its receiving half.
    pub(crate) fn subscribe(&mut self) -> oneshot::Receiver<OperationOutcome> {
        let (tx, rx) = oneshot::channel();
        self.result_tx = Some(tx);
        rx
    }

    /// Fire exactly one completion hook and publish the outcome.
    pub(crate) fn complete(mut self, outcome: OperationOutcome) {
        let callback = if outcome.is_success() {
            self.callbacks.on_success.take()
        } else {
            self.callbacks.on_failure.take()
        };
        if let Some(callback) = callback {
            callback(&outcome);
        }
        if let Some(tx) = self.result_tx.take() {
            // Receiver may already be gone for async submissions.
            let _ = tx.send(outcome);
        }
    }

    /// Complete with a failure carrying this operation's attempt count.
    pub(crate) fn fail(self, reason: FailureReason, response: Option<HttpResponse>) {
        let failure = OperationFailure {
            reason,
            attempts: self.attempts,
            response,
        };
        self.complete(OperationOutcome::Failed(failure));
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("op_type", &self.op_type)
            .field("bundle", &self.bundle)
            .field("item_key", &self.item_key)
            .field("method", &self.request.method)
            .field("uri", &self.request.uri)
            .field("expected_success_code", &self.expected_success_code)
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.max_attempts)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("discard", &self.discard)
            .finish_non_exhaustive()
    }
}

/// Hand out strictly increasing millisecond timestamps within this process.
pub fn next_timestamp_ms() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let previous = LAST_TIMESTAMP_MS
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or(now);
    now.max(previous.saturating_add(1))
}

/// Make sure later timestamps sort after `timestamp_ms`, e.g. one restored from disk.
pub(crate) fn observe_timestamp_ms(timestamp_ms: i64) {
    LAST_TIMESTAMP_MS.fetch_max(timestamp_ms, Ordering::AcqRel);
}
