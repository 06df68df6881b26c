//! Process-wide token bucket for outbound inference requests
//!
//! The inference service enforces one limit per credential, so a single
//! [`RateLimiter`] is shared by every stage of every concurrently running
//! pipeline. Refill is computed lazily from the elapsed time on each
//! acquisition attempt; there is no background timer.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default capacity, in requests per minute
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 10;

const REFILL_WINDOW: Duration = Duration::from_secs(60);
const EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64, per_second: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * per_second).min(capacity);
        self.last_refill = now;
    }
}

/// Token bucket with capacity N and continuous refill of N per minute
///
/// The bucket starts full, so a burst of N is admitted at once and the refill
/// adds up to N more within the same minute. Any rolling 60s window can see
/// close to 2N acquisitions; the sustained rate is N per minute.
///
/// Waiters are served in FIFO order: the bucket lives behind a fair async
/// mutex that a waiter keeps while it sleeps for its token.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a full bucket allowing `capacity` requests per `window`
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let window_secs = window.as_secs_f64().max(EPSILON);
        Self {
            capacity,
            per_second: capacity / window_secs,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, REFILL_WINDOW)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Waits until a token is available, then consumes it
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        loop {
            bucket.refill(Instant::now(), self.capacity, self.per_second);
            if bucket.tokens + EPSILON >= 1.0 {
                bucket.tokens = (bucket.tokens - 1.0).max(0.0);
                trace!(remaining = bucket.tokens, "Rate limiter token acquired");
                return;
            }

            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second);
            debug!(wait_ms = wait.as_millis() as u64, "Rate limiter exhausted, waiting for refill");
            tokio::time::sleep(wait).await;
        }
    }

    /// Consumes a token only if one is available right now and nobody is queued
    pub fn try_acquire(&self) -> bool {
        let Ok(mut bucket) = self.bucket.try_lock() else {
            return false;
        };
        bucket.refill(Instant::now(), self.capacity, self.per_second);
        if bucket.tokens + EPSILON >= 1.0 {
            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Current token count after lazy refill
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now(), self.capacity, self.per_second);
        bucket.tokens
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_REQUESTS_PER_MINUTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::per_minute(10);
        let start = Instant::now();

        for _ in 0..10 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(limiter.available().await < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_beyond_capacity_waits_for_refill() {
        let limiter = RateLimiter::per_minute(10);
        for _ in 0..10 {
            limiter.acquire().await;
        }

        let start = Instant::now();
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_bucket_admits_two_capacities_in_first_minute() {
        let limiter = RateLimiter::per_minute(4);
        let start = Instant::now();

        for _ in 0..8 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_secs(61));
        assert!(start.elapsed() >= Duration::from_secs(59));

        let before = Instant::now();
        limiter.acquire().await;
        assert!(before.elapsed() >= Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_capacity() {
        let limiter = RateLimiter::per_minute(5);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(limiter.available().await, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_are_spaced_by_refill_rate() {
        let limiter = Arc::new(RateLimiter::per_minute(10));
        for _ in 0..10 {
            limiter.acquire().await;
        }

        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                start.elapsed()
            }));
        }

        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }
        waits.sort();

        assert!(waits[0] >= Duration::from_secs(6));
        assert!(waits[1] >= Duration::from_secs(12));
        assert!(waits[2] >= Duration::from_secs(18));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let limiter = RateLimiter::per_minute(0);
        assert_eq!(limiter.capacity(), 1);
    }
}
