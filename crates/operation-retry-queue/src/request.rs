//! HTTP request and response model carried by queued operations.

use std::collections::BTreeMap;
use std::fmt;

/// Header carrying the bearer token.
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Header carrying the body's media type.
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";

/// HTTP methods the queue knows how to persist.
///
/// Discriminants are part of the persisted format and must never change.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Patch = 3,
    Delete = 4,
}

impl HttpMethod {
    /// Convert from the persisted byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Get),
            1 => Some(Self::Post),
            2 => Some(Self::Put),
            3 => Some(Self::Patch),
            4 => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully built outbound HTTP request.
///
/// Headers live in a sorted map so that the binary form is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Create a request with no headers and an empty body.
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Set (or replace) a header value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header(HEADER_CONTENT_TYPE, content_type);
    }

    /// Set the `Authorization: Bearer <token>` header.
    pub fn set_bearer_token(&mut self, token: &str) {
        self.set_header(HEADER_AUTHORIZATION, format!("Bearer {}", token));
    }

    /// Attach a JSON body and matching content type.
    pub fn with_json_body(mut self, body: &str) -> Self {
        self.body = body.as_bytes().to_vec();
        self.set_content_type("application/json");
        self
    }
}

/// A response received from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
