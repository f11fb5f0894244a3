//! Bounded retry with exponential backoff and jitter.
//!
//! Delay before retry `n` (0-based) is `min(initial_delay * backoff_factor^n, max_delay)`,
//! perturbed uniformly by up to `± jitter_factor * delay` so concurrent source
//! searches that fail together do not retry in lockstep.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// Every attempt failed; carries the last error seen.
#[derive(Debug, Error)]
#[error("all {attempts} attempts failed; last error: {last_error}")]
pub struct ExhaustedRetries<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E> ExhaustedRetries<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Fraction of the delay used as the jitter amplitude, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff delay before jitter for the retry following `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max = self.max_delay.as_secs_f64();
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        if secs.is_finite() {
            Duration::from_secs_f64(secs.clamp(0.0, max))
        } else {
            self.max_delay
        }
    }

    /// [`base_delay`](Self::base_delay) perturbed by uniform jitter drawn from `rng`.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let amplitude = base * self.jitter_factor.clamp(0.0, 1.0);
        // NaN survives `clamp`; treat it as no jitter.
        if amplitude.is_nan() || amplitude <= 0.0 {
            return Duration::from_secs_f64(base);
        }
        let offset = rng.gen_range(-amplitude..=amplitude);
        Duration::from_secs_f64((base + offset).max(0.0))
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        self.jittered_delay(attempt, &mut rand::thread_rng())
    }

    /// Run `operation` until it succeeds or `max_retries + 1` attempts have failed.
    ///
    /// The closure receives the 0-based attempt number. Every error is retried;
    /// error kinds are not distinguished.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, ExhaustedRetries<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_retries => {
                    return Err(ExhaustedRetries { attempts: attempt + 1, last_error: err });
                }
                Err(err) => {
                    let delay = self.next_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        error = %err,
                        delay_secs = delay.as_secs_f64(),
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_nan_jitter_means_no_jitter() {
        let policy = RetryPolicy { jitter_factor: f64::NAN, ..RetryPolicy::default() };
        let mut rng = StepRng::new(0, 1);
        assert_eq!(policy.jittered_delay(1, &mut rng), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        let delays: Vec<u64> = (0..7).map(|n| policy.base_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10, 10]);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(10_000), policy.max_delay);
    }

    #[test]
    fn test_jitter_stays_within_amplitude() {
        let policy = RetryPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 0..6 {
            let base = policy.base_delay(attempt).as_secs_f64();
            for _ in 0..50 {
                let d = policy.jittered_delay(attempt, &mut rng).as_secs_f64();
                assert!(d >= base * 0.75 - 1e-9 && d <= base * 1.25 + 1e-9);
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy { jitter_factor: 0.0, ..RetryPolicy::default() };
        let mut rng = StepRng::new(0, 1);
        assert_eq!(policy.jittered_delay(2, &mut rng), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_retries_plus_one() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default().with_max_retries(2);

        let result: Result<(), _> = policy
            .execute(|_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("connection reset")
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "connection reset");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let value = policy
            .execute(|attempt| async move {
                if attempt < 2 { Err("503") } else { Ok(attempt) }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        // Two sleeps: ~1s and ~2s, each jittered by at most 25%.
        assert!(start.elapsed() >= Duration::from_secs_f64(0.75 + 1.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_policy_tries_once() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::none()
            .execute(|_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
