//! Process-wide leaky bucket rate limiter (§3 "Rate-limit state", §4.1).
//!
//! A single bucket shared by every request: capacity equal to the
//! configured requests-per-second, refilling at one token per `1/RPS`
//! seconds. `try_acquire` never blocks — denial is immediate, satisfying the
//! "never blocking" suspension-point rule in §5.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity_per_sec: u32) -> Self {
        let capacity = capacity_per_sec.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Single-bucket leaky bucket rate limiter shared by the whole process.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            bucket: Mutex::new(Bucket::new(requests_per_second)),
            retry_after_secs: ceil_div(1, requests_per_second.max(1)),
        }
    }

    /// Attempts to take one token. Returns `Ok(())` on success or
    /// `Err(retry_after_secs)` when the bucket is empty.
    pub fn try_acquire(&self) -> Result<(), u64> {
        let mut bucket = self.bucket.lock();
        if bucket.try_take() {
            Ok(())
        } else {
            Err(self.retry_after_secs)
        }
    }

    /// `Retry-After` hint: `ceil(1 / RPS)` seconds (§3 invariant).
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }
}

fn ceil_div(numerator: u32, denominator: u32) -> u64 {
    Duration::from_secs_f64(numerator as f64 / denominator as f64)
        .as_secs_f64()
        .ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_requests_immediately() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let limiter = RateLimiter::new(50);
        assert!(limiter.retry_after_secs() >= 1);
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let limiter = RateLimiter::new(3);
        std::thread::sleep(Duration::from_millis(50));
        let mut successes = 0;
        for _ in 0..10 {
            if limiter.try_acquire().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 3);
    }
}
