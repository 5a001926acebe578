//! HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! Caller builds an OutboundRequest + CallContext
//!     → client.rs (trace annotation, request ID, retry + breaker)
//!     → transport.rs (one attempt: send, stream the body)
//!     → response.rs (decode the uniform envelope)
//!     → error.rs (one typed outcome per call)
//! ```

pub mod client;
pub mod error;
pub mod request;
pub mod response;
pub mod transport;

pub use client::{RemoteClient, RemoteClientBuilder};
pub use error::RemoteError;
pub use request::{CallContext, OutboundRequest, X_REQUEST_ID};
pub use response::{Reply, ResponseEnvelope};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
