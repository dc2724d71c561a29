//! Bounds how many probes run at once and how long each may take.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time;

use crate::errors::ScanError;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const MAX_CONCURRENCY: usize = 50;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LimitError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limiter is closed")]
    Closed,
}

/// Semaphore-backed concurrency ceiling with a per-call timeout.
///
/// Cloning is cheap and every clone shares the same slots.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    timeout: Duration,
}

impl RateLimiter {
    /// # Example
    ///
    /// ```rust
    /// # use iptvscan::limiter::RateLimiter;
    /// # use std::time::Duration;
    /// assert!(RateLimiter::new(10, Duration::from_secs(10)).is_ok());
    /// assert!(RateLimiter::new(51, Duration::from_secs(10)).is_err());
    /// ```
    pub fn new(max_concurrency: usize, timeout: Duration) -> Result<Self, ScanError> {
        if !(1..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(ScanError::Concurrency {
                value: max_concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        let timeout = check_timeout(timeout)?;

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            capacity: max_concurrency,
            timeout,
        })
    }

    pub const fn max_concurrency(&self) -> usize {
        self.capacity
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Slots not currently held by anyone.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free slot. The slot is handed back when the returned
    /// guard is dropped, whatever happens to the work done under it.
    pub async fn acquire(&self) -> Result<Slot, LimitError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimitError::Closed)?;
        Ok(Slot {
            _permit: permit,
            timeout: self.timeout,
        })
    }

    /// Runs `fut` under a slot, cut off after `timeout` or the limiter's
    /// default.
    pub async fn execute<F>(&self, fut: F, timeout: Option<Duration>) -> Result<F::Output, LimitError>
    where
        F: Future,
    {
        let slot = self.acquire().await?;
        slot.run(fut, timeout).await
    }

    /// Wakes every waiter with [`LimitError::Closed`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            capacity: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Accepts timeouts in `(0, MAX_TIMEOUT]`.
pub(crate) fn check_timeout(timeout: Duration) -> Result<Duration, ScanError> {
    if timeout.is_zero() || timeout > MAX_TIMEOUT {
        return Err(ScanError::Timeout {
            value: timeout,
            max: MAX_TIMEOUT,
        });
    }
    Ok(timeout)
}

/// A held concurrency slot.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    timeout: Duration,
}

impl Slot {
    /// Deadline for a call: the override if given, the limiter's default
    /// otherwise, never more than [`MAX_TIMEOUT`].
    pub fn deadline(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.timeout).min(MAX_TIMEOUT)
    }

    /// Runs `fut` while holding this slot and releases it afterwards.
    pub async fn run<F>(self, fut: F, timeout: Option<Duration>) -> Result<F::Output, LimitError>
    where
        F: Future,
    {
        let deadline = self.deadline(timeout);
        time::timeout(deadline, fut)
            .await
            .map_err(|_| LimitError::Timeout(deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::{LimitError, RateLimiter, MAX_TIMEOUT};
    use crate::errors::ScanError;
    use futures::future::join_all;
    use parameterized::parameterized;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn ceiling_is_never_exceeded() {
        let limiter = RateLimiter::new(2, Duration::from_secs(5)).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let tasks = (0..4).map(|_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            limiter.execute(
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                },
                None,
            )
        });

        for result in join_all(tasks).await {
            assert!(result.is_ok());
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20)).unwrap();
        let result = limiter
            .execute(tokio::time::sleep(Duration::from_secs(5)), None)
            .await;
        assert_eq!(result, Err(LimitError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn explicit_timeout_overrides_default() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10)).unwrap();
        let result = limiter
            .execute(
                async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    7
                },
                Some(Duration::from_secs(2)),
            )
            .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn slot_is_released_after_timeout() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10)).unwrap();
        let _ = limiter
            .execute(tokio::time::sleep(Duration::from_secs(1)), None)
            .await;
        assert_eq!(limiter.available(), 1);
        assert_eq!(limiter.execute(async { "ok" }, None).await, Ok("ok"));
    }

    #[tokio::test]
    async fn dropping_slot_frees_it() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1)).unwrap();
        let slot = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        drop(slot);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn closed_limiter_rejects_waiters() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1)).unwrap();
        limiter.close();
        assert_eq!(limiter.acquire().await.unwrap_err(), LimitError::Closed);
    }

    #[parameterized(concurrency = { 0, 51, 1000 })]
    fn concurrency_out_of_bounds(concurrency: usize) {
        let err = RateLimiter::new(concurrency, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ScanError::Concurrency { max: 50, .. }));
    }

    #[tokio::test]
    async fn overrides_never_exceed_the_ceiling() {
        let limiter = RateLimiter::new(1, Duration::from_secs(5)).unwrap();
        let slot = limiter.acquire().await.unwrap();

        assert_eq!(slot.deadline(None), Duration::from_secs(5));
        assert_eq!(slot.deadline(Some(Duration::from_secs(20))), Duration::from_secs(20));
        assert_eq!(slot.deadline(Some(MAX_TIMEOUT)), MAX_TIMEOUT);
        assert_eq!(slot.deadline(Some(Duration::from_secs(3600))), MAX_TIMEOUT);
    }

    #[test]
    fn timeout_out_of_bounds() {
        for timeout in [Duration::ZERO, MAX_TIMEOUT + Duration::from_millis(1)] {
            let err = RateLimiter::new(10, timeout).unwrap_err();
            assert!(matches!(err, ScanError::Timeout { .. }));
        }
    }

    #[test]
    fn boundaries_are_accepted() {
        assert!(RateLimiter::new(1, Duration::from_millis(1)).is_ok());
        assert!(RateLimiter::new(50, MAX_TIMEOUT).is_ok());
    }

    #[test]
    fn default_matches_constants() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.max_concurrency(), 10);
        assert_eq!(limiter.timeout(), Duration::from_secs(10));
    }
}
