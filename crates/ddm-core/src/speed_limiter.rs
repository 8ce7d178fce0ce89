//! Process-wide token-bucket speed limiter shared by all Part Fetchers.
//!
//! `acquire` blocks the calling thread until enough tokens have accrued (or
//! the cancellation token is set). A rate of 0 means unlimited: `acquire`
//! returns immediately without consuming tokens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Bucket {
    /// Tokens currently available (bytes).
    tokens: f64,
    /// Wall-clock time the bucket was last refilled.
    last_refill: Instant,
}

/// Shared, cloneable speed limiter. Clone to hand to multiple Part Fetchers;
/// all clones draw from the same bucket.
#[derive(Clone)]
pub struct SpeedLimiter {
    inner: Arc<Mutex<Bucket>>,
    /// Bytes/sec fill rate. 0 means unlimited.
    rate: u64,
    /// Maximum burst size (bucket capacity), in bytes.
    burst: u64,
}

impl SpeedLimiter {
    /// Create a limiter with the given rate (bytes/sec) and burst capacity.
    /// `rate == 0` disables limiting entirely.
    pub fn new(rate: u64, burst: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                tokens: burst as f64,
                last_refill: Instant::now(),
            })),
            rate,
            burst: burst.max(1),
        }
    }

    /// An unlimited limiter (rate 0); `acquire` is a no-op.
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    fn refill(&self, bucket: &mut Bucket) {
        if self.rate == 0 {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.rate as f64).min(self.burst as f64);
    }

    /// Block until `n` bytes' worth of tokens are available, or `cancel` is set.
    /// Returns `false` if cancelled before acquiring, `true` on success.
    pub fn acquire(&self, n: u64, cancel: &AtomicBool) -> bool {
        if self.rate == 0 {
            return true;
        }
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            let wait = {
                let mut bucket = self.inner.lock().unwrap();
                self.refill(&mut bucket);
                if bucket.tokens >= n as f64 {
                    bucket.tokens -= n as f64;
                    return true;
                }
                let deficit = n as f64 - bucket.tokens;
                Duration::from_secs_f64((deficit / self.rate as f64).max(0.001))
            };
            std::thread::sleep(wait.min(Duration::from_millis(250)));
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_blocks() {
        let limiter = SpeedLimiter::unlimited();
        let cancel = AtomicBool::new(false);
        assert!(limiter.acquire(10_000_000, &cancel));
    }

    #[test]
    fn burst_is_available_immediately() {
        let limiter = SpeedLimiter::new(1000, 1000);
        let cancel = AtomicBool::new(false);
        assert!(limiter.acquire(1000, &cancel));
    }

    #[test]
    fn exceeding_burst_blocks_until_refill() {
        let limiter = SpeedLimiter::new(10_000, 1000);
        let cancel = AtomicBool::new(false);
        assert!(limiter.acquire(1000, &cancel));
        let start = Instant::now();
        assert!(limiter.acquire(500, &cancel));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn cancellation_unblocks_acquire() {
        let limiter = SpeedLimiter::new(1, 1);
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_clone = Arc::clone(&cancel);
        let limiter_clone = limiter.clone();
        let handle = std::thread::spawn(move || limiter_clone.acquire(1_000_000, &cancel_clone));
        std::thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::Relaxed);
        assert!(!handle.join().unwrap());
    }
}
