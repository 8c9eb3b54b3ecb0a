//! HTTP transport seam and the default reqwest-backed implementation.

use crate::error::TransportError;
use crate::request::{HttpMethod, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends one request and returns whatever the server answered.
///
/// Non-2xx statuses are ordinary responses. Only failures to obtain a
/// response at all are errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Whether a status code is worth retrying.
///
/// Request timeout, throttling and server errors are transient. 501 and 505
/// describe a server that will never handle the request.
pub fn is_response_code_retryable(status: u16) -> bool {
    match status {
        408 | 429 => true,
        501 | 505 => false,
        500..=599 => true,
        _ => false,
    }
}

/// [`HttpTransport`] on top of `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose connect and whole-request timeouts are `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { http_client })
    }

    /// Wrap an existing client.
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    fn method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http_client
            .request(Self::method(request.method), &request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        debug!(method = %request.method, uri = %request.uri, "Sending request");

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                warn!(uri = %request.uri, error = %e, "Could not build request");
                TransportError::InvalidRequest(e.to_string())
            } else {
                warn!(uri = %request.uri, error = %e, "Request failed without a response");
                TransportError::Connection(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?
            .to_vec();

        debug!(uri = %request.uri, status, "Received response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
