//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a resilient remote client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-attempt deadline.
    pub timeouts: TimeoutConfig,

    /// Optional forward proxy for the transport.
    pub proxy: ProxyConfig,

    /// Circuit breaker settings for the downstream target.
    pub breaker: BreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Overall deadline for a single attempt, in milliseconds.
    pub request_ms: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_ms: 20_000 }
    }
}

/// Forward proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy URL (e.g., "http://127.0.0.1:3128"). `None` disables proxying.
    pub url: Option<String>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Stable name of the downstream target, used in logs and metrics.
    pub name: String,

    /// Probe calls admitted while half-open.
    pub max_half_open_requests: u32,

    /// Closed-state evaluation window in seconds (0 = never expires).
    pub interval_secs: u64,

    /// Time spent open before a probe is admitted, in seconds.
    pub open_timeout_secs: u64,

    /// Minimum completed calls in the window before the breaker may trip.
    pub trip_min_requests: u32,

    /// Failure ratio at or above which the breaker trips.
    pub trip_failure_ratio: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "HTTP".to_string(),
            max_half_open_requests: 2,
            interval_secs: 300,
            open_timeout_secs: 30,
            trip_min_requests: 3,
            trip_failure_ratio: 0.6,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts per call. `None` retries until the breaker opens.
    pub max_attempts: Option<u32>,

    /// Base delay for linear backoff in milliseconds.
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_base_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
