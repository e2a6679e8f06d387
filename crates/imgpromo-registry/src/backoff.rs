//! Retrying transient failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::BackoffPolicy;
use crate::error::{RegistryError, Result};

/// Runs `op` until it succeeds, fails permanently, or the policy runs out.
///
/// Only errors for which [`RegistryError::is_retryable`] holds are retried.
/// `notify` is called with each retried error and the delay before the next
/// attempt.
///
/// # Errors
///
/// Returns the first non-retryable error, or
/// [`RegistryError::RetriesExhausted`] wrapping the last transient error.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
/// use imgpromo_registry::{retry_notify, BackoffPolicy, RegistryError};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let calls = &AtomicU32::new(0);
/// let policy = BackoffPolicy::default().with_initial_interval(Duration::from_millis(1));
/// let value = retry_notify(
///     &policy,
///     || async move {
///         if calls.fetch_add(1, Ordering::SeqCst) == 0 {
///             Err(RegistryError::HttpError { status: 503, message: String::new() })
///         } else {
///             Ok(7)
///         }
///     },
///     |_, _| {},
/// )
/// .await
/// .unwrap();
/// assert_eq!(value, 7);
/// # });
/// ```
pub async fn retry_notify<T, F, Fut, N>(policy: &BackoffPolicy, mut op: F, mut notify: N) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(&RegistryError, Duration),
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        let delay = jittered(policy, attempt);
        attempt += 1;

        if start.elapsed() + delay >= policy.max_elapsed {
            return Err(RegistryError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        notify(&err, delay);
        tokio::time::sleep(delay).await;
    }
}

fn jittered(policy: &BackoffPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay(attempt);
    if policy.randomization_factor <= 0.0 || base.is_zero() {
        return base;
    }
    let factor = rand::thread_rng().gen_range(
        (1.0 - policy.randomization_factor)..=(1.0 + policy.randomization_factor),
    );
    base.mul_f64(factor)
}
