use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between dispatch starts.
///
/// Waiters are served in arrival order (tokio's mutex is fair). The slot is
/// only claimed once the wait has finished, so a caller dropped mid-wait
/// leaves no trace.
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next dispatch may start. Returns how long this call slept.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last.lock().await;
        let start = Instant::now();
        if let Some(prev) = *last {
            let ready = prev + self.interval;
            if ready > start {
                tokio::time::sleep_until(ready).await;
            }
        }
        let now = Instant::now();
        *last = Some(now);
        now.saturating_duration_since(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_acquires_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        let t0 = Instant::now();
        limiter.acquire().await;
        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::from_millis(100));
        assert!(Instant::now() - t0 >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_after_interval_elapsed() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_never_overlap() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut starts = Vec::new();
        for h in handles {
            starts.push(h.await.unwrap());
        }
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_does_not_claim_slot() {
        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire().await;
        let cancelled = tokio::time::timeout(Duration::from_millis(10), limiter.acquire()).await;
        assert!(cancelled.is_err());

        // The interval is still measured from the first acquire.
        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::from_millis(90));
    }
}
