//! Linear backoff.

use std::time::Duration;

/// Delay before the next attempt after `failed_attempts` failures.
///
/// Grows linearly: `base`, `2 × base`, `3 × base`, … and saturates instead of
/// overflowing.
pub fn calculate_backoff(failed_attempts: u32, base: Duration) -> Duration {
    if failed_attempts == 0 {
        return Duration::ZERO;
    }
    base.saturating_mul(failed_attempts)
}
