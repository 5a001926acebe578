//! Caller-facing error taxonomy.

use thiserror::Error;

use crate::http::transport::TransportError;
use crate::resilience::RetryError;

/// Everything a remote call can fail with.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The breaker is open or retries gave up.
    #[error("could not connect to service: {reason}")]
    DownstreamUnavailable { reason: String },

    /// Headers arrived but the body could not be read.
    #[error("failed to read response body: {0}")]
    BodyRead(TransportError),

    #[error("service returned unexpected data: {0}")]
    UnexpectedResponseData(#[source] serde_json::Error),

    #[error("call cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RemoteError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::DownstreamUnavailable { .. } => "unavailable",
            RemoteError::BodyRead(_) => "body_read",
            RemoteError::UnexpectedResponseData(_) => "unexpected_data",
            RemoteError::Cancelled => "cancelled",
            RemoteError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<RetryError<TransportError>> for RemoteError {
    fn from(e: RetryError<TransportError>) -> Self {
        match e {
            RetryError::Cancelled => RemoteError::Cancelled,
            RetryError::Permanent(TransportError::Request(reason)) => RemoteError::InvalidRequest(reason),
            other => RemoteError::DownstreamUnavailable { reason: other.to_string() },
        }
    }
}
