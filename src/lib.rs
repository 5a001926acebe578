//! Resilient client for calling downstream HTTP services.
//!
//! Wraps every outbound call in a circuit breaker, retries transport failures
//! with linear backoff, propagates W3C trace context and decodes the uniform
//! `{error_code, error_note, data}` response envelope.

pub mod config;
pub mod http;
pub mod observability;
pub mod resilience;

pub use config::ClientConfig;
pub use http::{CallContext, OutboundRequest, RemoteClient, RemoteError, Reply, ResponseEnvelope};
pub use observability::TraceContext;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
