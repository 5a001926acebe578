//! Outbound request and per-call context.
//!
//! # Responsibilities
//! - Describe one logical outbound call (method, URL, headers, body)
//! - Generate a request ID that stays the same across retries
//! - Carry the caller's cancellation token and optional trace parent
//!
//! # Design Decisions
//! - The body is buffered so every retry sends identical bytes
//! - The context is borrowed for the call and never stored

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::http::error::RemoteError;
use crate::observability::TraceContext;

pub const X_REQUEST_ID: &str = "x-request-id";

/// A request to a downstream service.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Build a request from a URL string.
    pub fn parse(method: Method, url: &str) -> Result<Self, RemoteError> {
        let url = Url::parse(url)
            .map_err(|e| RemoteError::InvalidRequest(format!("invalid URL '{url}': {e}")))?;
        Ok(Self::new(method, url))
    }

    pub fn get(url: &str) -> Result<Self, RemoteError> {
        Self::parse(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<Self, RemoteError> {
        Self::parse(Method::POST, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, RemoteError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| RemoteError::InvalidRequest(format!("unserializable body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(body);
        Ok(self)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
    }

    /// Return the request ID, generating a UUID v4 if the caller did not set one.
    pub fn ensure_request_id(&mut self) -> String {
        if let Some(id) = self.request_id() {
            return id.to_string();
        }
        let id = Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&id) {
            self.headers.insert(X_REQUEST_ID, value);
        }
        id
    }
}

/// Per-call context: cancellation and an optional trace parent.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    trace: Option<TraceContext>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_trace(mut self, parent: TraceContext) -> Self {
        self.trace = Some(parent);
        self
    }

    /// Continue the trace described by an incoming `traceparent` value, if it parses.
    pub fn with_traceparent(mut self, value: &str) -> Self {
        self.trace = TraceContext::from_traceparent(value);
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
