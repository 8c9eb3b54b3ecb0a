//! Retrying HTTP operation queue.
//!
//! This crate provides:
//! - RetryableHttpClient: actor-style worker that sends, retries and completes operations
//! - filter_queue: collapses redundant operations before they are saved or replayed
//! - QueueStore: framed on-disk spill of undelivered operations
//! - RetryStrategy: exponential backoff or constant interval
//! - HttpTransport: the sending seam, with a reqwest implementation

mod client;
pub mod codec;
mod error;
mod filter;
mod operation;
mod request;
mod store;
mod strategy;
mod transport;

pub use client::{
    is_operation_retryable, AuthorizationSetter, ClientConfig, DispatchMode, RequestSpec,
    RetryableHttpClient, Submission, DEFAULT_MAX_EXPONENTIAL_THRESHOLD, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_RETRY_INTERVAL,
};
pub use codec::{try_deserialize_binary, try_serialize_binary};
pub use error::{AdmissionError, QueueError, QueueResult, TransportError};
pub use filter::{filter_queue, FilteredQueue};
pub use operation::{
    next_timestamp_ms, FailureReason, Operation, OperationCallbacks, OperationFailure,
    OperationOutcome, OperationType, ResponseCallback, OPERATION_ATTEMPTS_NO_LIMIT,
};
pub use request::{HttpMethod, HttpRequest, HttpResponse, HEADER_AUTHORIZATION, HEADER_CONTENT_TYPE};
pub use store::{QueueStore, SaveReport};
pub use strategy::{RetryStrategy, STRATEGY_CONSTANT_INTERVAL, STRATEGY_EXPONENTIAL_BACKOFF};
pub use transport::{is_response_code_retryable, HttpTransport, ReqwestTransport};
