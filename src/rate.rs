//! Transfer rate measurement and application-level rate caps.
//!
//! [`RateMeter`] estimates bytes/second over a sliding window in O(1) per
//! sample. [`TokenBucket`] caps upload throughput; downloads are capped by
//! the coordinator's request budget instead, since a download cap has to act
//! before bytes are asked for rather than when they arrive.

use std::time::{Duration, Instant};

use crate::constants::RATE_FUDGE;

/// Moving-average byte rate over a window of `max_rate_period`.
///
/// Each update folds the new amount into the running rate weighted by how
/// much of the window the old estimate covered. The window start trails the
/// newest sample by at most `max_rate_period`, so old traffic decays away.
#[derive(Debug, Clone)]
pub struct RateMeter {
    max_rate_period: Duration,
    rate_since: Instant,
    last: Instant,
    rate: f64,
    total: u64,
}

impl RateMeter {
    pub fn new(max_rate_period: Duration) -> Self {
        Self::new_at(max_rate_period, Instant::now())
    }

    pub fn new_at(max_rate_period: Duration, now: Instant) -> Self {
        let rate_since = now.checked_sub(RATE_FUDGE).unwrap_or(now);
        Self {
            max_rate_period,
            rate_since,
            last: rate_since,
            rate: 0.0,
            total: 0,
        }
    }

    pub fn update(&mut self, bytes: u64) {
        self.update_at(bytes, Instant::now());
    }

    /// Records `bytes` transferred at `now`.
    pub fn update_at(&mut self, bytes: u64, now: Instant) {
        self.total += bytes;

        let covered = self.last.duration_since(self.rate_since).as_secs_f64();
        let span = now.duration_since(self.rate_since).as_secs_f64();
        self.rate = (self.rate * covered + bytes as f64) / (span + 0.0001);
        self.last = now;

        if let Some(window_start) = now.checked_sub(self.max_rate_period) {
            if self.rate_since < window_start {
                self.rate_since = window_start;
            }
        }
    }

    pub fn rate(&mut self) -> f64 {
        self.rate_at(Instant::now())
    }

    /// Current rate in bytes/second, decayed up to `now`.
    pub fn rate_at(&mut self, now: Instant) -> f64 {
        self.update_at(0, now);
        self.rate
    }

    /// Bytes recorded since creation.
    pub fn total(&self) -> u64 {
        self.total
    }
}

/// A token bucket rate cap.
///
/// Tokens accrue at `bytes_per_sec` up to a burst of twice that. A rate of
/// zero means unlimited.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    tokens_per_sec: f64,
    last_update: Instant,
}

impl TokenBucket {
    pub fn new(bytes_per_sec: u64, now: Instant) -> Self {
        let max_tokens = (bytes_per_sec * 2) as f64;
        Self {
            tokens: max_tokens,
            max_tokens,
            tokens_per_sec: bytes_per_sec as f64,
            last_update: now,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.tokens_per_sec == 0.0
    }

    pub fn set_rate(&mut self, bytes_per_sec: u64) {
        self.tokens_per_sec = bytes_per_sec as f64;
        self.max_tokens = (bytes_per_sec * 2) as f64;
        self.tokens = self.tokens.min(self.max_tokens);
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        self.tokens = (self.tokens + elapsed * self.tokens_per_sec).min(self.max_tokens);
    }

    /// Takes `bytes` tokens if available.
    ///
    /// A send larger than the whole bucket is let through once the bucket is
    /// full, otherwise a big chunk could never go out under a small cap.
    pub fn try_consume(&mut self, bytes: usize, now: Instant) -> bool {
        if self.is_unlimited() {
            return true;
        }
        self.refill(now);

        let wanted = (bytes as f64).min(self.max_tokens);
        if self.tokens >= wanted {
            self.tokens = (self.tokens - bytes as f64).max(-self.max_tokens);
            true
        } else {
            false
        }
    }

    /// Tokens (bytes) currently available.
    pub fn available(&mut self, now: Instant) -> usize {
        if self.is_unlimited() {
            return usize::MAX;
        }
        self.refill(now);
        self.tokens.max(0.0) as usize
    }
}
