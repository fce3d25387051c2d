//! Jittered exponential backoff with an optional total-time deadline.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use observability_deps::tracing::warn;
use rand::Rng;
use snafu::Snafu;
use std::{future::Future, ops::ControlFlow, time::Duration};

/// Error returned by [`Backoff::retry_with_backoff`].
#[derive(Debug, Snafu)]
pub enum BackoffError<E>
where
    E: std::error::Error + Send + 'static,
{
    #[snafu(display("retry budget exhausted after {n_attempts} attempts: {source}"))]
    DeadlineExceeded { n_attempts: usize, source: E },
}

/// Backoff result.
pub type BackoffResult<T, E> = Result<T, BackoffError<E>>;

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub init_backoff: Duration,

    /// Ceiling for the per-retry delay.
    pub max_backoff: Duration,

    /// Multiplier applied to the delay after every retry.
    pub base: f64,

    /// Total time budget across all attempts, or `None` to retry forever.
    pub deadline: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(500),
            base: 3.0,
            deadline: None,
        }
    }
}

/// [`Backoff`] drives a retry loop over a fallible async operation,
/// sleeping a jittered, exponentially growing delay between attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Retry `op` until it breaks or the deadline elapses.
    ///
    /// `op` returns [`ControlFlow::Break`] with the final outcome, or
    /// [`ControlFlow::Continue`] with the retryable error that caused this
    /// attempt to fail.
    pub async fn retry_with_backoff<F, F1, B, E>(
        &mut self,
        task_name: &str,
        mut op: F,
    ) -> BackoffResult<B, E>
    where
        F: (FnMut() -> F1) + Send,
        F1: Future<Output = ControlFlow<B, E>> + Send,
        B: Send,
        E: std::error::Error + Send + 'static,
    {
        let mut elapsed = Duration::ZERO;
        let mut next_backoff = self.config.init_backoff;
        let mut n_attempts = 0usize;

        loop {
            n_attempts += 1;
            let error = match op().await {
                ControlFlow::Break(outcome) => return Ok(outcome),
                ControlFlow::Continue(error) => error,
            };

            let delay = jitter(next_backoff);
            if let Some(deadline) = self.config.deadline {
                if elapsed + delay > deadline {
                    return Err(BackoffError::DeadlineExceeded {
                        n_attempts,
                        source: error,
                    });
                }
            }

            warn!(
                error = %error,
                task_name,
                backoff_ms = delay.as_millis() as u64,
                "request failed, backing off",
            );

            tokio::time::sleep(delay).await;
            elapsed += delay;
            next_backoff = next_backoff
                .mul_f64(self.config.base)
                .min(self.config.max_backoff);
        }
    }
}

/// A uniformly random delay in `[d/2, d]`, so concurrent retry loops do not
/// synchronize.
fn jitter(d: Duration) -> Duration {
    if d.is_zero() {
        return d;
    }
    let factor = rand::thread_rng().gen_range(0.5..=1.0);
    d.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Debug, Snafu)]
    #[snafu(display("transient"))]
    struct TransientError;

    #[tokio::test]
    async fn first_attempt_success_needs_no_sleep() {
        let result: BackoffResult<u32, TransientError> = Backoff::new(&BackoffConfig::default())
            .retry_with_backoff("test", || async { ControlFlow::Break(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let captured = Arc::clone(&attempts);

        let result: BackoffResult<usize, TransientError> =
            Backoff::new(&BackoffConfig::default())
                .retry_with_backoff("test", move || {
                    let attempts = Arc::clone(&captured);
                    async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            ControlFlow::Continue(TransientError)
                        } else {
                            ControlFlow::Break(7)
                        }
                    }
                })
                .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_total_retry_time() {
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            base: 2.0,
            deadline: Some(Duration::from_secs(10)),
        };

        let result: BackoffResult<(), TransientError> = Backoff::new(&config)
            .retry_with_backoff("test", || async { ControlFlow::Continue(TransientError) })
            .await;

        let err = result.unwrap_err();
        let BackoffError::DeadlineExceeded { n_attempts, .. } = err;
        assert!(n_attempts > 1);
    }
}
