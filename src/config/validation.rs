//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ratios within (0, 1])
//! - Check the proxy URL parses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::ClientConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("breaker.trip_failure_ratio must be within (0, 1], got {0}")]
    FailureRatio(f64),

    #[error("breaker.name must not be empty")]
    EmptyName,

    #[error("proxy.url '{url}' is invalid: {reason}")]
    ProxyUrl { url: String, reason: String },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.request_ms" });
    }

    let breaker = &config.breaker;
    if breaker.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }
    if breaker.max_half_open_requests == 0 {
        errors.push(ValidationError::Zero { field: "breaker.max_half_open_requests" });
    }
    if breaker.open_timeout_secs == 0 {
        errors.push(ValidationError::Zero { field: "breaker.open_timeout_secs" });
    }
    if breaker.trip_min_requests == 0 {
        errors.push(ValidationError::Zero { field: "breaker.trip_min_requests" });
    }
    let ratio = breaker.trip_failure_ratio;
    if ratio.is_nan() || ratio <= 0.0 || ratio > 1.0 {
        errors.push(ValidationError::FailureRatio(ratio));
    }

    if config.retries.max_attempts == Some(0) {
        errors.push(ValidationError::Zero { field: "retries.max_attempts" });
    }

    if let Some(raw) = &config.proxy.url {
        if let Err(e) = Url::parse(raw) {
            errors.push(ValidationError::ProxyUrl {
                url: raw.clone(),
                reason: e.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
