//! Retry delay schedule for failed jobs.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based)
///
/// Uses the configured list while it lasts, then keeps multiplying the last
/// listed value by `backoff_multiplier`. Always capped at `max_backoff_seconds`.
pub fn retry_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let max = Duration::from_secs(config.max_backoff_seconds);
    let schedule = &config.default_backoff_seconds;

    let Some(&last) = schedule.last() else {
        return Duration::ZERO;
    };

    let index = attempt.saturating_sub(1) as usize;
    let delay = match schedule.get(index) {
        Some(&seconds) => Duration::from_secs(seconds),
        None => {
            let overflow = (index + 1 - schedule.len()) as i32;
            Duration::from_secs(last).mul_f64(config.backoff_multiplier.powi(overflow))
        }
    };

    delay.min(max)
}
