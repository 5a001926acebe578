//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream target:
//!     → retries.rs (drive attempts, linear backoff, honour cancellation)
//!     → circuit_breaker.rs (admit or reject, record transport outcome)
//!     → timeouts.rs (per-attempt deadline around the transport)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Only transport failures feed the breaker; any response is a success
//! - An open breaker ends the retry loop immediately
//! - Breakers are per-target values shared through `Arc`, never globals

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState, Counts};
pub use retries::{RetryError, RetryPolicy, RetryState};
