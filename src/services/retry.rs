// src/services/retry.rs

//! Request pacing and retry decisions.
//!
//! Nothing here sleeps on its own: callers ask for a [`Duration`] and hand
//! it to a [`Sleeper`], which tests replace with [`RecordingSleeper`].

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{FetchErrorKind, FetchResult};
use crate::models::{CrawlerConfig, RetryConfig};

/// Source of delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every non-zero delay requested so far, in call order.
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total(&self) -> Duration {
        self.recorded().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            self.slept
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(duration);
        }
    }
}

/// Position of a request within the crawl, for pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// No request has been issued yet by this worker
    pub is_first: bool,
    /// The request moves on to a new province
    pub starts_province: bool,
}

/// Per-worker pacing between report requests.
///
/// Every worker waits the same delay independently. With `n` workers the
/// aggregate rate is therefore bounded by `n / delay`, an approximation of
/// a global limit rather than a guarantee.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    base: Duration,
    jitter: Duration,
    province_delay: Duration,
}

impl RateLimiter {
    pub fn new(base: Duration, jitter: Duration, province_delay: Duration) -> Self {
        Self {
            base,
            jitter,
            province_delay,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.request_delay(),
            config.request_jitter(),
            config.province_delay(),
        )
    }

    /// No pacing at all.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to observe before issuing the request described by `context`:
    /// base ± uniform jitter, plus the province pause on a province boundary.
    pub fn delay_before_request(&self, context: RequestContext) -> Duration {
        if context.is_first {
            return Duration::ZERO;
        }

        let jitter_ms = self.jitter.as_millis() as i64;
        let offset_ms = if jitter_ms > 0 {
            rand::rng().random_range(-jitter_ms..=jitter_ms)
        } else {
            0
        };
        let base_ms = (self.base.as_millis() as i64 + offset_ms).max(0) as u64;
        let mut delay = Duration::from_millis(base_ms);

        if context.starts_province {
            delay += self.province_delay;
        }
        delay
    }
}

/// Retry decisions for failed requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    ///
    /// Only transient failures are retried, and never once `attempt` has
    /// reached the configured maximum.
    pub fn should_retry(&self, attempt: u32, kind: FetchErrorKind) -> bool {
        attempt < self.max_attempts && kind.is_transient()
    }

    /// Wait after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)` capped at the maximum, then scaled by a
    /// random factor in `[1 - jitter, 1 + jitter]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let capped_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);
        let capped = Duration::from_millis(capped_ms);

        if self.jitter > 0.0 {
            let scale = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
            capped.mul_f64(scale)
        } else {
            capped
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently or runs out of attempts,
    /// sleeping the backoff between attempts.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, context: &str, mut op: F) -> FetchResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = FetchResult<T>> + Send,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, error.kind) => {
                    let delay = self.backoff(attempt);
                    log::warn!(
                        "{context}: attempt {attempt}/{} failed ({error}), retrying in {:.1}s",
                        self.max_attempts,
                        delay.as_secs_f64()
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [FetchErrorKind; 9] = [
        FetchErrorKind::Timeout,
        FetchErrorKind::Connection,
        FetchErrorKind::Server(500),
        FetchErrorKind::RateLimited,
        FetchErrorKind::NotFound,
        FetchErrorKind::Forbidden,
        FetchErrorKind::Client(400),
        FetchErrorKind::InvalidRequest,
        FetchErrorKind::InvalidPayload,
    ];

    fn policy(max_attempts: u32, jitter: f64) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_millis(1000),
            jitter,
        )
    }

    #[test]
    fn never_retries_past_max_attempts() {
        let policy = policy(3, 0.0);
        for kind in ALL_KINDS {
            for attempt in 3..10 {
                assert!(!policy.should_retry(attempt, kind), "{kind:?} at {attempt}");
            }
        }
    }

    #[test]
    fn retries_only_transient_errors() {
        let policy = policy(3, 0.0);
        assert!(policy.should_retry(1, FetchErrorKind::Timeout));
        assert!(policy.should_retry(2, FetchErrorKind::Server(503)));
        assert!(policy.should_retry(1, FetchErrorKind::RateLimited));
        assert!(policy.should_retry(1, FetchErrorKind::Connection));
        assert!(!policy.should_retry(1, FetchErrorKind::NotFound));
        assert!(!policy.should_retry(1, FetchErrorKind::InvalidRequest));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(10, 0.0);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(200), Duration::from_millis(1000));
    }

    #[test]
    fn backoff_jitter_stays_in_band() {
        let policy = policy(10, 0.5);
        for _ in 0..200 {
            let d = policy.backoff(2);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn first_request_is_not_delayed() {
        let limiter = RateLimiter::new(
            Duration::from_millis(1000),
            Duration::from_millis(200),
            Duration::from_millis(2000),
        );
        let ctx = RequestContext {
            is_first: true,
            starts_province: true,
        };
        assert_eq!(limiter.delay_before_request(ctx), Duration::ZERO);
    }

    #[test]
    fn province_boundary_adds_longer_pause() {
        let limiter = RateLimiter::new(
            Duration::from_millis(1000),
            Duration::from_millis(200),
            Duration::from_millis(2000),
        );
        for _ in 0..100 {
            let sibling = limiter.delay_before_request(RequestContext::default());
            assert!(sibling >= Duration::from_millis(800));
            assert!(sibling <= Duration::from_millis(1200));

            let boundary = limiter.delay_before_request(RequestContext {
                is_first: false,
                starts_province: true,
            });
            assert!(boundary >= Duration::from_millis(2800));
            assert!(boundary <= Duration::from_millis(3200));
        }
    }

    #[tokio::test]
    async fn run_retries_transient_then_succeeds() {
        use crate::error::FetchError;
        use std::sync::atomic::{AtomicU32, Ordering};

        let policy = policy(3, 0.0);
        let sleeper = RecordingSleeper::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = policy
            .run(&sleeper, "catalog", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::new(FetchErrorKind::Server(503), "busy"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn run_stops_on_permanent_error() {
        use crate::error::FetchError;
        use std::sync::atomic::{AtomicU32, Ordering};

        let policy = policy(3, 0.0);
        let sleeper = RecordingSleeper::new();
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: FetchResult<()> = policy
            .run(&sleeper, "catalog", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::new(FetchErrorKind::NotFound, "gone"))
            })
            .await;

        assert_eq!(result.unwrap_err().kind, FetchErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn recording_sleeper_skips_zero_delays() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::ZERO).await;
        sleeper.sleep(Duration::from_millis(5)).await;
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(5)]);
    }
}
