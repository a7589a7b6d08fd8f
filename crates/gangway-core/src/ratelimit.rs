// SPDX-FileCopyrightText: 2026 Gangway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token-bucket rate limiter for inbound requests.
//!
//! Refill is continuous and monotonic: `capacity` tokens per `window`.
//! When empty, callers get the duration to wait before the next token.

use std::time::{Duration, Instant};

/// Default request cap per window.
pub const DEFAULT_CAPACITY: u32 = 20;

/// Default refill window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// A token bucket with fractional continuous refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    window: Duration,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Takes one token, or returns how long to wait for the next one.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    fn refill_rate(&self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }

    fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = self.tokens + elapsed.as_secs_f64() * self.refill_rate();
        self.tokens = refilled.min(f64::from(self.capacity));
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate()))
        }
    }

    /// Refills the bucket to capacity. Used when a session is reset.
    pub fn reset(&mut self) {
        self.tokens = f64::from(self.capacity);
        self.last_refill = Instant::now();
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_bucket_allows_capacity_requests() {
        let mut bucket = TokenBucket::new(5, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..5 {
            assert!(bucket.try_acquire_at(now).is_ok());
        }
        assert!(bucket.try_acquire_at(now).is_err());
    }

    #[test]
    fn empty_bucket_reports_retry_after() {
        let mut bucket = TokenBucket::new(2, Duration::from_secs(60));
        let now = Instant::now();
        bucket.try_acquire_at(now).unwrap();
        bucket.try_acquire_at(now).unwrap();

        let retry = bucket.try_acquire_at(now).unwrap_err();
        // One token refills in window / capacity = 30s.
        assert!(retry > Duration::from_secs(29));
        assert!(retry <= Duration::from_secs(30));
    }

    #[test]
    fn refill_is_monotonic() {
        let mut bucket = TokenBucket::new(2, Duration::from_secs(2));
        let start = Instant::now();
        bucket.try_acquire_at(start).unwrap();
        bucket.try_acquire_at(start).unwrap();
        assert!(bucket.try_acquire_at(start).is_err());

        // After a full window the bucket is full again.
        let later = start + Duration::from_secs(2);
        assert!(bucket.try_acquire_at(later).is_ok());
        assert!(bucket.try_acquire_at(later).is_ok());
    }

    #[test]
    fn reset_refills_to_capacity() {
        let mut bucket = TokenBucket::new(1, Duration::from_secs(60));
        let now = Instant::now();
        bucket.try_acquire_at(now).unwrap();
        assert!(bucket.try_acquire_at(now).is_err());
        bucket.reset();
        assert!(bucket.try_acquire().is_ok());
    }
}
