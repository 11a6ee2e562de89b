//! Token-bucket byte throttle pacing compaction reads.

use std::time::Duration;

use tokio::{sync::Mutex, time::Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Per-run token bucket. Capacity equals the refill rate, so at most one
/// second of read bandwidth can burst.
pub struct Throttle {
    bytes_per_sec: u64,
    state: Mutex<BucketState>,
}

impl Throttle {
    /// Build a bucket refilling `bytes_per_sec` tokens per second with the
    /// same capacity.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: bytes_per_sec.max(1),
            state: Mutex::new(BucketState {
                tokens: bytes_per_sec.max(1) as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Configured refill rate in bytes per second.
    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Wait until `bytes` tokens are available, then consume them.
    ///
    /// Requests larger than the bucket capacity are clamped so a single
    /// oversized read cannot stall forever; callers already cap batches at
    /// the read-batch limit.
    pub async fn acquire(&self, bytes: u64) {
        let capacity = self.bytes_per_sec as f64;
        let need = (bytes as f64).min(capacity);
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.bytes_per_sec as f64).min(capacity);
                state.last_refill = now;
                if state.tokens >= need {
                    state.tokens -= need;
                    return;
                }
                Duration::from_secs_f64((need - state.tokens) / self.bytes_per_sec as f64)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
