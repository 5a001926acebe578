//! Transport abstraction.
//!
//! # Responsibilities
//! - Send one request attempt and hand back status, headers and a body stream
//! - Classify network failures (connect, timeout, malformed request)
//!
//! # Design Decisions
//! - The body is a stream so a failed read is distinct from a failed send
//! - `HttpTransport` wraps a single pooled `reqwest::Client`
//! - Deadlines are applied by the caller (see `resilience::timeouts`)

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::http::request::OutboundRequest;

/// Network-level failure of one attempt.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("request could not be sent: {0}")]
    Request(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// A malformed request will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Request(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::Request(e.to_string())
        } else if e.is_timeout() {
            TransportError::Other(format!("timed out: {e}"))
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Response body as a stream of chunks.
pub type BodyStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// A response whose body has not been read yet.
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: BodyStream,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self { status, headers, body }
    }

    /// A response with a fully buffered body.
    pub fn from_bytes(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        let chunk: Result<Vec<u8>, TransportError> = Ok(body.into());
        Self::new(status, HeaderMap::new(), stream::once(async move { chunk }).boxed())
    }

    /// Read the whole body. Fails on the first broken chunk.
    pub async fn read_body(mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Capability to send one request attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport, optionally routing every request through `proxy`.
    pub fn new(proxy: Option<&Url>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(100));

        builder = match proxy {
            Some(url) => builder.proxy(reqwest::Proxy::all(url.as_str())?),
            None => builder.no_proxy(),
        };

        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from))
            .boxed();

        Ok(TransportResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_body_concatenates_chunks() {
        let chunks: Vec<Result<Vec<u8>, TransportError>> = vec![Ok(b"{\"error_".to_vec()), Ok(b"code\":0}".to_vec())];
        let response = TransportResponse::new(StatusCode::OK, HeaderMap::new(), stream::iter(chunks).boxed());
        assert_eq!(response.read_body().await.unwrap(), b"{\"error_code\":0}");
    }

    #[tokio::test]
    async fn test_read_body_surfaces_broken_chunk() {
        let chunks = vec![Ok(b"{".to_vec()), Err(TransportError::Other("connection reset".into()))];
        let response = TransportResponse::new(StatusCode::OK, HeaderMap::new(), stream::iter(chunks).boxed());
        assert!(matches!(response.read_body().await, Err(TransportError::Other(_))));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!TransportError::Request("bad header".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_connect_failure_classified() {
        // Port 9 (discard) on localhost is almost never listening.
        let transport = HttpTransport::new(None).unwrap();
        let request = OutboundRequest::get("http://127.0.0.1:9/").unwrap();
        let err = transport.send(&request).await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
