//! Exponential backoff: double the delay each attempt, cap it, and give up
//! once cumulative wait would exceed a budget.

use std::time::Duration;

use crate::platform::Platform;

/// Computes the backoff delay for the given zero-indexed attempt, capped at
/// `max_delay`.
pub fn backoff_delay(base_delay: Duration, max_delay: Duration, attempt: u32) -> Duration {
    let scaled = base_delay.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.min(max_delay)
}

pub struct RetryBudget {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total: Duration,
}

/// Upper bound on how long a single sleep slice runs before re-checking
/// cancellation, so a long backoff delay doesn't block cancellation for its
/// entire length.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl RetryBudget {
    /// Sleeps for the backoff delay of `attempt`, honoring cancellation.
    /// Returns `false` if the cumulative elapsed time would exceed the
    /// budget (caller should give up) or if `cancelled` fires mid-sleep.
    pub async fn wait(
        &self,
        platform: &dyn Platform,
        attempt: u32,
        elapsed_so_far: Duration,
        cancelled: &(dyn Fn() -> bool + Sync),
    ) -> bool {
        let delay = backoff_delay(self.base_delay, self.max_delay, attempt);
        if elapsed_so_far + delay > self.max_total {
            return false;
        }
        if cancelled() {
            return false;
        }
        let mut remaining = delay;
        while remaining > Duration::ZERO {
            let slice = remaining.min(CANCEL_POLL_INTERVAL);
            platform.sleep(slice).await;
            if cancelled() {
                return false;
            }
            remaining -= slice;
        }
        true
    }
}
