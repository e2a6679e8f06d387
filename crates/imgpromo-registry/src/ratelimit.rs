//! Client-side request rate limiting.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::RateLimit;

/// Spaces requests evenly at a fixed rate, shared by every task using the
/// client.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// Creates a limiter for the given rate. A rate of zero disables waiting.
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        let interval = if limit.requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / limit.requests_per_second
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits until the caller may issue one request.
    pub async fn acquire(&self) {
        let wake_at = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(wake_at).await;
    }
}
