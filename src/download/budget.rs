use std::time::Instant;

use crate::constants::{RATE_BUDGET_BURST_SECS, UNLIMITED_QUEUE};

/// Global download cap enforced by limiting how many bytes are requested.
///
/// `bytes_requested` grows with every REQUEST and drains at
/// `download_rate`. While it is negative there is credit, and the queue
/// limit is the number of whole chunks that credit buys. Credit never
/// exceeds [`RATE_BUDGET_BURST_SECS`] seconds of rate.
#[derive(Debug, Clone)]
pub struct RateBudget {
    download_rate: u64,
    chunk_size: u32,
    bytes_requested: f64,
    last_time: Instant,
}

impl RateBudget {
    pub fn new(download_rate: u64, chunk_size: u32, now: Instant) -> Self {
        Self {
            download_rate,
            chunk_size: chunk_size.max(1),
            bytes_requested: 0.0,
            last_time: now,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.download_rate == 0
    }

    pub fn set_rate(&mut self, download_rate: u64) {
        self.download_rate = download_rate;
    }

    pub fn download_rate(&self) -> u64 {
        self.download_rate
    }

    pub fn chunk_requested(&mut self, length: u32) {
        self.bytes_requested += f64::from(length);
    }

    /// Drains the accumulator up to `now`. Returns true while in credit.
    pub fn refill(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f64();
        self.bytes_requested -= elapsed * self.download_rate as f64;
        self.last_time = now;
        self.bytes_requested < 0.0
    }

    /// Bounds the burst credit and returns the queue limit in chunks.
    pub fn limit(&mut self) -> usize {
        if self.is_unlimited() {
            return UNLIMITED_QUEUE;
        }
        let floor = -RATE_BUDGET_BURST_SECS * self.download_rate as f64;
        if self.bytes_requested < floor {
            self.bytes_requested = floor;
        }
        (-self.bytes_requested / f64::from(self.chunk_size)).max(0.0) as usize
    }

    /// [`refill`](Self::refill) then [`limit`](Self::limit).
    pub fn queue_limit(&mut self, now: Instant) -> usize {
        if self.is_unlimited() {
            return UNLIMITED_QUEUE;
        }
        self.refill(now);
        self.limit()
    }

    pub fn bytes_requested(&self) -> f64 {
        self.bytes_requested
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_budget_exhausted_then_refilled() {
        let start = Instant::now();
        let mut budget = RateBudget::new(10_000, 1_000, start);
        for _ in 0..20 {
            budget.chunk_requested(1_000);
        }

        assert_eq!(budget.queue_limit(start + Duration::from_millis(500)), 0);
        // 15 000 of the 20 000 requested bytes drained, 5 000 still owed
        assert_eq!(budget.queue_limit(start + Duration::from_millis(1500)), 0);
        assert_eq!(budget.queue_limit(start + Duration::from_millis(2500)), 5);
    }

    #[test]
    fn test_burst_credit_is_bounded() {
        let start = Instant::now();
        let mut budget = RateBudget::new(10_000, 1_000, start);

        assert_eq!(budget.queue_limit(start + Duration::from_secs(60)), 50);
        assert!(budget.bytes_requested() >= -50_000.0);

        budget.chunk_requested(1_000);
        assert_eq!(budget.queue_limit(start + Duration::from_secs(60)), 49);
    }

    #[test]
    fn test_unlimited_budget() {
        let start = Instant::now();
        let mut budget = RateBudget::new(0, 16_384, start);
        budget.chunk_requested(1 << 20);
        assert_eq!(budget.queue_limit(start), UNLIMITED_QUEUE);
    }
}
