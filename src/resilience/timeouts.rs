//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap each transport attempt with its deadline
//! - Cancel the attempt cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out attempt is a transport failure: it counts toward the breaker
//!   and is retried like any other connection problem

use std::future::Future;
use std::time::Duration;

use crate::http::transport::TransportError;

/// Run `attempt`, failing with [`TransportError::Timeout`] once `deadline` passes.
pub async fn with_deadline<T, F>(deadline: Duration, attempt: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(deadline, attempt).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}
