//! Retryable HTTP client: admission, the background worker and its backlog.
//!
//! Producers never touch the backlog. Every submission travels to the worker
//! over a bounded channel and the worker is the only task that sends,
//! retries, completes or persists operations.

use crate::error::{AdmissionError, TransportError};
use crate::filter::filter_queue;
use crate::operation::{
    observe_timestamp_ms, FailureReason, Operation, OperationCallbacks, OperationOutcome,
    OperationType,
};
use crate::request::{HttpRequest, HttpResponse};
use crate::store::QueueStore;
use crate::strategy::RetryStrategy;
use crate::transport::{is_response_code_retryable, HttpTransport};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Default retry interval.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default cap on pending operations.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 256;

/// Default cap on the exponential backoff multiplier.
pub const DEFAULT_MAX_EXPONENTIAL_THRESHOLD: u32 = 32;

/// Capacity of the command channel feeding the worker.
const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Rewrites a request's `Authorization` header right before it is sent.
pub type AuthorizationSetter = Arc<dyn Fn(&mut HttpRequest) + Send + Sync>;

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub strategy: RetryStrategy,
    /// Admission limit on pending operations.
    pub max_queue_size: usize,
    /// Where undelivered operations are spilled on shutdown and reloaded on start.
    pub queue_file: Option<PathBuf>,
    pub authorization: Option<AuthorizationSetter>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::ExponentialBackoff {
                interval: DEFAULT_RETRY_INTERVAL,
                max_threshold: DEFAULT_MAX_EXPONENTIAL_THRESHOLD,
            },
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            queue_file: None,
            authorization: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("strategy", &self.strategy)
            .field("max_queue_size", &self.max_queue_size)
            .field("queue_file", &self.queue_file)
            .field("authorization", &self.authorization.is_some())
            .finish()
    }
}

/// How [`RetryableHttpClient::make_request`] waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Return only once the operation reached a terminal state.
    Sync,
    /// Return as soon as the operation is admitted.
    Async,
}

/// An admitted submission.
#[derive(Debug)]
pub enum Submission {
    /// Terminal outcome of a [`DispatchMode::Sync`] submission.
    Completed(OperationOutcome),
    /// Receiver for the outcome of a [`DispatchMode::Async`] submission.
    Pending(oneshot::Receiver<OperationOutcome>),
}

/// Parameters of one [`RetryableHttpClient::make_request`] call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub op_type: OperationType,
    pub bundle: String,
    pub item_key: String,
    pub request: HttpRequest,
    pub expected_success_code: u16,
    pub max_attempts: u32,
}

impl RequestSpec {
    pub fn new(
        op_type: OperationType,
        bundle: impl Into<String>,
        item_key: impl Into<String>,
        request: HttpRequest,
        expected_success_code: u16,
        max_attempts: u32,
    ) -> Self {
        Self {
            op_type,
            bundle: bundle.into(),
            item_key: item_key.into(),
            request,
            expected_success_code,
            max_attempts,
        }
    }
}

enum Command {
    Submit(Operation),
    Reconfigure {
        transport: Option<Arc<dyn HttpTransport>>,
        strategy: RetryStrategy,
        max_queue_size: usize,
    },
    Shutdown,
}

/// State visible to both producers and the worker.
struct Shared {
    pending: AtomicUsize,
    max_queue_size: AtomicUsize,
    healthy: AtomicBool,
}

impl Shared {
    fn release(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// HTTP client that queues operations and retries transient failures.
pub struct RetryableHttpClient {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetryableHttpClient {
    /// Load any persisted backlog and spawn the worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(transport: Arc<dyn HttpTransport>, config: ClientConfig) -> Self {
        let shared = Arc::new(Shared {
            pending: AtomicUsize::new(0),
            max_queue_size: AtomicUsize::new(config.max_queue_size),
            healthy: AtomicBool::new(true),
        });

        let store = config.queue_file.map(QueueStore::new);
        let backlog = match &store {
            Some(store) => load_backlog(store),
            None => VecDeque::new(),
        };
        shared.pending.store(backlog.len(), Ordering::Release);

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let worker = Worker {
            transport,
            strategy: config.strategy,
            authorization: config.authorization,
            store,
            shared: shared.clone(),
            backlog,
            commands: rx,
            stopping: false,
        };

        info!(
            strategy = ?worker.strategy,
            max_queue_size = config.max_queue_size,
            restored = worker.backlog.len(),
            "Starting retryable HTTP client"
        );

        let handle = tokio::spawn(worker.run());

        Self {
            shared,
            commands: tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Submit an operation.
    ///
    /// Rejections happen here and never reach the callbacks. Once admitted,
    /// exactly one of the callbacks fires on the worker task.
    pub async fn make_request(
        &self,
        mode: DispatchMode,
        spec: RequestSpec,
        callbacks: OperationCallbacks,
    ) -> Result<Submission, AdmissionError> {
        let mut operation = Operation::new(
            spec.op_type,
            spec.bundle,
            spec.item_key,
            spec.request,
            spec.expected_success_code,
            spec.max_attempts,
        );

        if !self.should_enqueue_with_unhealthy_connection(&operation) {
            debug!(
                bundle = %operation.bundle(),
                "Refusing read operation while the connection is unhealthy"
            );
            return Err(AdmissionError::UnhealthyConnection);
        }

        self.acquire_slot()?;

        operation.set_callbacks(callbacks);
        let rx = operation.subscribe();

        debug!(
            op_type = ?operation.op_type(),
            bundle = %operation.bundle(),
            item_key = %operation.item_key(),
            "Enqueuing operation"
        );

        if self.commands.send(Command::Submit(operation)).await.is_err() {
            self.shared.release();
            return Err(AdmissionError::ShutDown);
        }

        match mode {
            DispatchMode::Async => Ok(Submission::Pending(rx)),
            DispatchMode::Sync => rx
                .await
                .map(Submission::Completed)
                .map_err(|_| AdmissionError::ShutDown),
        }
    }

    /// Whether `operation` may be queued given the current connection health.
    pub fn should_enqueue_with_unhealthy_connection(&self, operation: &Operation) -> bool {
        self.is_healthy() || !operation.op_type().is_read()
    }

    /// Swap the transport (if given), strategy and queue limit.
    ///
    /// Applied by the worker between two sends.
    pub async fn reconfigure(
        &self,
        transport: Option<Arc<dyn HttpTransport>>,
        strategy: RetryStrategy,
        max_queue_size: usize,
    ) -> Result<(), AdmissionError> {
        self.commands
            .send(Command::Reconfigure {
                transport,
                strategy,
                max_queue_size,
            })
            .await
            .map_err(|_| AdmissionError::ShutDown)
    }

    /// Stop the worker, persisting or failing whatever is still queued.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Retry worker ended abnormally");
            }
        }
    }

    /// Operations admitted but not yet in a terminal state.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn max_queue_size(&self) -> usize {
        self.shared.max_queue_size.load(Ordering::Acquire)
    }

    /// False after a connection-level failure until the next HTTP response.
    pub fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Acquire)
    }

    fn acquire_slot(&self) -> Result<(), AdmissionError> {
        let capacity = self.shared.max_queue_size.load(Ordering::Acquire);
        self.shared
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < capacity).then_some(pending + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                warn!(capacity, "Retry queue is full, rejecting operation");
                AdmissionError::QueueFull { capacity }
            })
    }
}

impl Drop for RetryableHttpClient {
    // Dropping the sender closes the command channel; the detached worker
    // then drains and completes everything still queued.
    fn drop(&mut self) {
        if self.worker.get_mut().take().is_some() {
            debug!("Retryable HTTP client dropped without shutdown, worker will drain");
        }
    }
}

/// Whether a failed send should be retried.
///
/// `response` is `None` when the transport got no response at all.
pub fn is_operation_retryable(operation: &Operation, response: Option<&HttpResponse>) -> bool {
    if operation.attempts_exhausted() || operation.op_type().is_read() {
        return false;
    }
    match response {
        Some(response) => is_response_code_retryable(response.status),
        None => true,
    }
}

fn load_backlog(store: &QueueStore) -> VecDeque<Operation> {
    let loaded = match store.load() {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!(path = %store.path().display(), error = %e, "Could not load saved operation queue");
            return VecDeque::new();
        }
    };
    if let Err(e) = store.remove() {
        warn!(path = %store.path().display(), error = %e, "Could not remove saved operation queue");
    }
    let retained = filter_queue(loaded).retained;
    if let Some(latest) = retained.iter().map(Operation::timestamp_ms).max() {
        observe_timestamp_ms(latest);
    }
    retained.into()
}

struct Worker {
    transport: Arc<dyn HttpTransport>,
    strategy: RetryStrategy,
    authorization: Option<AuthorizationSetter>,
    store: Option<QueueStore>,
    shared: Arc<Shared>,
    backlog: VecDeque<Operation>,
    commands: mpsc::Receiver<Command>,
    stopping: bool,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.dispatch_ready().await;
            if self.stopping {
                break;
            }

            let wakeup = self.next_wakeup(Instant::now());
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => self.stopping = true,
                },
                _ = sleep_until_deadline(wakeup) => {}
            }
            if self.stopping {
                break;
            }
        }
        self.finish();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(operation) => self.backlog.push_back(operation),
            Command::Reconfigure {
                transport,
                strategy,
                max_queue_size,
            } => {
                if let Some(transport) = transport {
                    self.transport = transport;
                }
                self.strategy = strategy;
                self.shared
                    .max_queue_size
                    .store(max_queue_size, Ordering::Release);
                info!(?strategy, max_queue_size, "Retry client reconfigured");
            }
            Command::Shutdown => self.stopping = true,
        }
    }

    /// Send every operation that is due, oldest first.
    async fn dispatch_ready(&mut self) {
        loop {
            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
            }
            if self.stopping {
                return;
            }

            let Some(index) = self.next_ready_index(Instant::now()) else {
                return;
            };
            let Some(operation) = self.backlog.remove(index) else {
                return;
            };
            if let Some(operation) = self.send(operation).await {
                self.backlog.insert(index, operation);
            }
        }
    }

    /// First due operation whose unique key is not held by a waiting one.
    fn next_ready_index(&self, now: Instant) -> Option<usize> {
        let mut blocked: HashSet<&str> = HashSet::new();
        for (index, operation) in self.backlog.iter().enumerate() {
            if blocked.contains(operation.unique_key()) {
                continue;
            }
            match operation.not_before {
                Some(not_before) if not_before > now => {
                    blocked.insert(operation.unique_key());
                }
                _ => return Some(index),
            }
        }
        None
    }

    fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        self.backlog
            .iter()
            .filter_map(|operation| operation.not_before)
            .filter(|not_before| *not_before > now)
            .min()
    }

    /// Send once and classify. Returns the operation if it must be retried.
    async fn send(&mut self, mut operation: Operation) -> Option<Operation> {
        if let Some(authorization) = &self.authorization {
            authorization(operation.request_mut());
        }
        operation.record_attempt();

        debug!(
            bundle = %operation.bundle(),
            item_key = %operation.item_key(),
            attempt = operation.attempts(),
            "Sending operation"
        );

        match self.transport.send(operation.request()).await {
            Ok(response) => {
                self.shared.healthy.store(true, Ordering::Release);
                self.handle_response(operation, response)
            }
            Err(TransportError::Connection(message)) => {
                self.shared.healthy.store(false, Ordering::Release);
                warn!(
                    bundle = %operation.bundle(),
                    attempt = operation.attempts(),
                    error = %message,
                    "Connection failure"
                );
                if is_operation_retryable(&operation, None) {
                    return Some(self.schedule_retry(operation));
                }
                let reason = if operation.op_type().is_read() {
                    FailureReason::ReadNotRetried
                } else {
                    FailureReason::RetriesExhausted
                };
                self.fail(operation, reason, None);
                None
            }
            Err(TransportError::InvalidRequest(message)) => {
                error!(
                    bundle = %operation.bundle(),
                    uri = %operation.request().uri,
                    error = %message,
                    "Transport refused request"
                );
                self.fail(operation, FailureReason::Malformed(message), None);
                None
            }
        }
    }

    fn handle_response(&mut self, operation: Operation, response: HttpResponse) -> Option<Operation> {
        if response.status == operation.expected_success_code() {
            debug!(
                bundle = %operation.bundle(),
                status = response.status,
                attempts = operation.attempts(),
                "Operation succeeded"
            );
            self.shared.release();
            operation.complete(OperationOutcome::Succeeded(response));
            return None;
        }

        if is_operation_retryable(&operation, Some(&response)) {
            debug!(
                bundle = %operation.bundle(),
                status = response.status,
                attempt = operation.attempts(),
                "Transient failure, will retry"
            );
            return Some(self.schedule_retry(operation));
        }

        let reason = if !is_response_code_retryable(response.status) {
            FailureReason::Rejected
        } else if operation.op_type().is_read() {
            FailureReason::ReadNotRetried
        } else {
            FailureReason::RetriesExhausted
        };
        warn!(
            bundle = %operation.bundle(),
            item_key = %operation.item_key(),
            status = response.status,
            attempts = operation.attempts(),
            ?reason,
            "Operation failed"
        );
        self.fail(operation, reason, Some(response));
        None
    }

    fn schedule_retry(&self, mut operation: Operation) -> Operation {
        let delay = self
            .strategy
            .next_delay(operation.attempts().saturating_sub(1));
        operation.not_before = Some(Instant::now() + delay);
        debug!(
            bundle = %operation.bundle(),
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        operation
    }

    fn fail(&self, operation: Operation, reason: FailureReason, response: Option<HttpResponse>) {
        self.shared.release();
        operation.fail(reason, response);
    }

    /// Drain everything still queued, persisting it when a store is configured.
    fn finish(mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Submit(operation) = command {
                self.backlog.push_back(operation);
            }
        }

        let remaining: Vec<Operation> = self.backlog.drain(..).collect();
        info!(remaining = remaining.len(), "Stopping retryable HTTP client");

        let Some(store) = &self.store else {
            for operation in remaining {
                self.fail(operation, FailureReason::Shutdown { persisted: false }, None);
            }
            return;
        };

        let filtered = filter_queue(remaining);
        for operation in filtered.discarded {
            self.fail(operation, FailureReason::Superseded, None);
        }

        let report = match store.save(&filtered.retained) {
            Ok(report) => Some(report),
            Err(e) => {
                error!(path = %store.path().display(), error = %e, "Could not persist operation queue");
                None
            }
        };
        for (index, operation) in filtered.retained.into_iter().enumerate() {
            let persisted = report
                .as_ref()
                .is_some_and(|report| report.is_persisted(index));
            self.fail(operation, FailureReason::Shutdown { persisted }, None);
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
