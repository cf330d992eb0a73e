//! Token-bucket admission control.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::trace;

use crate::clock::Clock;

/// Tokens are tracked in thousandths so refill never drifts.
const MILLI: u128 = 1_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Bucket parameters, read from the active configuration on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimits {
    /// Maximum burst size
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
}

impl BucketLimits {
    fn capacity_milli(&self) -> u128 {
        self.capacity as u128 * MILLI
    }

    fn rate_milli(&self) -> u128 {
        if self.refill_per_sec.is_finite() && self.refill_per_sec > 0.0 {
            (self.refill_per_sec * MILLI as f64).round() as u128
        } else {
            0
        }
    }
}

#[derive(Debug)]
struct BucketState {
    /// Available tokens, in thousandths
    tokens_milli: u128,
    /// Clock reading at the last refill
    last_refill: Duration,
    /// Whether the bucket has been filled for the first time
    primed: bool,
}

/// Token bucket shared by every caller of one assessor.
///
/// The whole refill-check-decrement sequence runs under one lock, so
/// concurrent callers never lose or double-count a token.
pub struct TokenBucket {
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create an empty bucket; it fills to capacity on first use.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(BucketState {
                tokens_milli: 0,
                last_refill: Duration::ZERO,
                primed: false,
            }),
        }
    }

    /// Take one token. On failure returns how long until one is available.
    pub async fn try_acquire(&self, limits: BucketLimits) -> std::result::Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Self::refill(&mut state, now, limits);

        if state.tokens_milli >= MILLI {
            state.tokens_milli -= MILLI;
            trace!(remaining_milli = state.tokens_milli as u64, "Token acquired");
            return Ok(());
        }

        let rate = limits.rate_milli();
        let retry_after = if rate == 0 {
            Duration::MAX
        } else {
            let missing = MILLI - state.tokens_milli;
            let nanos = (missing * NANOS_PER_SEC).div_ceil(rate);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        };
        Err(retry_after)
    }

    /// Tokens currently available (after refill).
    pub async fn available(&self, limits: BucketLimits) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Self::refill(&mut state, now, limits);
        state.tokens_milli as f64 / MILLI as f64
    }

    fn refill(state: &mut BucketState, now: Duration, limits: BucketLimits) {
        let capacity = limits.capacity_milli();
        if !state.primed {
            state.tokens_milli = capacity;
            state.last_refill = now;
            state.primed = true;
            return;
        }

        let elapsed = now.saturating_sub(state.last_refill).as_nanos();
        let gained = elapsed.saturating_mul(limits.rate_milli()) / NANOS_PER_SEC;
        if gained > 0 {
            state.tokens_milli = state.tokens_milli.saturating_add(gained);
            state.last_refill = now;
        }
        // A shrinking capacity (reconfiguration) also trims stored tokens.
        state.tokens_milli = state.tokens_milli.min(capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limits(capacity: u32, refill_per_sec: f64) -> BucketLimits {
        BucketLimits { capacity, refill_per_sec }
    }

    #[tokio::test]
    async fn test_burst_then_reject() {
        let clock = Arc::new(ManualClock::new());
        let bucket = TokenBucket::new(clock.clone());
        let l = limits(3, 1.0);

        for _ in 0..3 {
            assert!(bucket.try_acquire(l).await.is_ok());
        }
        let retry = bucket.try_acquire(l).await.unwrap_err();
        assert_eq!(retry, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_refill_one_interval() {
        let clock = Arc::new(ManualClock::new());
        let bucket = TokenBucket::new(clock.clone());
        let l = limits(2, 10.0);

        assert!(bucket.try_acquire(l).await.is_ok());
        assert!(bucket.try_acquire(l).await.is_ok());
        assert!(bucket.try_acquire(l).await.is_err());

        clock.advance(Duration::from_millis(100));
        assert!(bucket.try_acquire(l).await.is_ok());
        assert!(bucket.try_acquire(l).await.is_err());
    }

    #[tokio::test]
    async fn test_refill_caps_at_capacity() {
        let clock = Arc::new(ManualClock::new());
        let bucket = TokenBucket::new(clock.clone());
        let l = limits(5, 100.0);

        assert_eq!(bucket.available(l).await, 5.0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(bucket.available(l).await, 5.0);

        // Capacity shrinks on reconfiguration
        assert_eq!(bucket.available(limits(2, 100.0)).await, 2.0);
    }

    #[tokio::test]
    async fn test_concurrent_exactly_once() {
        let clock = Arc::new(ManualClock::new());
        let bucket = Arc::new(TokenBucket::new(clock));
        let l = limits(40, 0.5);

        let mut handles = Vec::new();
        for _ in 0..100 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move { bucket.try_acquire(l).await.is_ok() }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 40);
    }
}
