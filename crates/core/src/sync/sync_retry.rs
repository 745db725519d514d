//! Backoff shared by the scheduler and transfer jobs.

use std::time::Duration;

/// Exponential backoff with cap. `attempt` counts failures so far, starting at 1.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    const MAX_EXPONENT: u32 = 16;

    let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
    base.saturating_mul(2_u32.pow(exponent)).min(max)
}
