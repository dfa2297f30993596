//! Token bucket rate limiter for simulated peer bandwidth.
//!
//! Tokens are bytes. All peer connections of an engine draw from one
//! bucket, so the configured rate bounds the engine's total throughput.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token bucket rate limiter.
///
/// Tokens are added at a fixed rate and consumed as bytes are transferred.
/// Allows bursts up to bucket capacity while maintaining the average rate.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens the bucket can hold
    capacity: u64,
    /// Current number of tokens in the bucket
    tokens: u64,
    /// Tokens added per second
    refill_rate: u64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates new token bucket with specified capacity and refill rate.
    ///
    /// # Panics
    ///
    /// Panics if capacity or refill_rate is zero.
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        assert!(
            capacity > 0,
            "Token bucket capacity must be greater than zero"
        );
        assert!(
            refill_rate > 0,
            "Token bucket refill rate must be greater than zero"
        );

        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Consumes up to `requested_tokens`, returning how many were taken.
    pub fn consume(&mut self, requested_tokens: u64) -> u64 {
        self.refill();

        let consumed = requested_tokens.min(self.tokens);
        self.tokens -= consumed;
        consumed
    }

    /// Returns current number of available tokens.
    pub fn available_tokens(&mut self) -> u64 {
        self.refill();
        self.tokens
    }

    /// Returns bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Time until `tokens` more tokens will have been added.
    pub fn time_until(&self, tokens: u64) -> Duration {
        Duration::from_secs_f64(tokens as f64 / self.refill_rate as f64)
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);

        if elapsed >= Duration::from_millis(1) {
            let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;

            if tokens_to_add > 0 {
                self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
                self.last_refill = now;
            }
        }
    }
}

/// Bandwidth limit shared between peer connections.
#[derive(Debug)]
pub struct Throttle {
    bucket: Option<Mutex<TokenBucket>>,
}

impl Throttle {
    /// Limits throughput to `bytes_per_second`, or not at all for `None`.
    ///
    /// The bucket holds one second worth of tokens.
    pub fn new(bytes_per_second: Option<u64>) -> Self {
        let bucket = bytes_per_second
            .filter(|rate| *rate > 0)
            .map(|rate| Mutex::new(TokenBucket::new(rate, rate)));
        Self { bucket }
    }

    /// Whether a limit is configured.
    pub fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    /// Suspends until `bytes` tokens have been consumed.
    ///
    /// Requests larger than the bucket are drained in several rounds.
    pub async fn acquire(&self, bytes: u64) {
        let Some(bucket) = &self.bucket else {
            return;
        };

        let mut remaining = bytes;
        while remaining > 0 {
            let wait = {
                let mut bucket = bucket.lock();
                remaining -= bucket.consume(remaining);
                bucket.time_until(remaining.min(bucket.capacity()))
            };
            if remaining > 0 {
                tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "Token bucket capacity must be greater than zero")]
    fn test_zero_capacity_panics() {
        TokenBucket::new(0, 10);
    }

    #[test]
    fn test_consume_partial() {
        let mut bucket = TokenBucket::new(100, 10);

        assert_eq!(bucket.consume(90), 90);
        assert_eq!(bucket.available_tokens(), 10);
        assert_eq!(bucket.consume(50), 10);
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn test_token_refill_respects_capacity() {
        let mut bucket = TokenBucket::new(100, 1000);
        assert_eq!(bucket.consume(100), 100);

        std::thread::sleep(Duration::from_millis(10));
        let available = bucket.available_tokens();
        assert!(available > 0, "expected refill, got {available}");
        assert!(available <= 100);
    }

    #[test]
    fn test_time_until() {
        let bucket = TokenBucket::new(100, 50);
        assert_eq!(bucket.time_until(25), Duration::from_millis(500));
    }

    #[test]
    fn test_unlimited_throttle_never_waits() {
        let throttle = Throttle::new(None);
        assert!(!throttle.is_limited());
        assert!(!Throttle::new(Some(0)).is_limited());

        let mut acquire = tokio_test::task::spawn(throttle.acquire(u64::MAX));
        tokio_test::assert_ready!(acquire.poll());
    }

    #[tokio::test]
    async fn test_throttle_delays_past_burst() {
        let throttle = Throttle::new(Some(10_000));
        let started = Instant::now();

        // First 10 kB is the initial burst, the next 2 kB needs ~200ms.
        throttle.acquire(10_000).await;
        throttle.acquire(2_000).await;

        assert!(started.elapsed() >= Duration::from_millis(150));
    }
}
