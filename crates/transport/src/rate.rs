//! Per-link outbound throttling and usage counters.
use hivemind_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    /// Burst capacity.
    capacity: u32,
    tokens: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, per_second: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate: per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Consume one token, or return how long until one is available.
    fn try_consume(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let needed = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(needed / self.refill_rate))
        }
    }
}

/// Token bucket guarding outbound sends on one link.
pub struct RateTrack(Mutex<Bucket>);

impl RateTrack {
    /// Fails unless `per_second` is a positive, finite rate.
    pub fn new(capacity: u32, per_second: f64) -> Result<Self> {
        if !(per_second.is_finite() && per_second > 0.0) {
            return Err(Error::Validation(format!(
                "send rate must be positive, got {}",
                per_second
            )));
        }
        Ok(Self(Mutex::new(Bucket::new(capacity.max(1), per_second))))
    }

    /// Acquire one send token, sleeping if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.0.lock().await;
                inner.try_consume()
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    pub async fn try_acquire(&self) -> bool {
        self.0.lock().await.try_consume().is_none()
    }
}

/// Monotonic counters for one link. Only `reset` lowers them.
#[derive(Debug, Default)]
pub struct UsageStats {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_failures: AtomicU64,
    poll_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
    pub poll_failures: u64,
}

impl UsageStats {
    pub fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_received,
            &self.bytes_sent,
            &self.bytes_received,
            &self.send_failures,
            &self.poll_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_exhausted_reports_wait() {
        let mut bucket = Bucket::new(2, 1.0);
        assert!(bucket.try_consume().is_none());
        assert!(bucket.try_consume().is_none());
        let wait = bucket.try_consume();
        assert!(wait.is_some());
        assert!(wait.unwrap().as_secs_f64() > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let track = RateTrack::new(1, 2.0).unwrap();
        track.acquire().await;
        assert!(!track.try_acquire().await);

        let start = Instant::now();
        track.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(450));
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        assert!(matches!(RateTrack::new(4, 0.0), Err(Error::Validation(_))));
        assert!(matches!(RateTrack::new(4, -1.0), Err(Error::Validation(_))));
        assert!(matches!(RateTrack::new(4, f64::NAN), Err(Error::Validation(_))));
    }

    #[test]
    fn test_usage_counters_and_reset() {
        let usage = UsageStats::default();
        usage.record_sent(10);
        usage.record_sent(5);
        usage.record_received(7);
        usage.record_poll_failure();

        let snap = usage.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 15);
        assert_eq!(snap.frames_received, 1);
        assert_eq!(snap.poll_failures, 1);

        usage.reset();
        assert_eq!(usage.snapshot(), UsageSnapshot::default());
    }
}
