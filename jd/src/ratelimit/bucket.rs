//! Token bucket

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Float slack so exact refills count as a whole token
const TOKEN_EPSILON: f64 = 1e-9;

/// Capacity and refill rate for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Maximum burst size
    pub capacity: u32,

    /// Tokens added per second
    #[serde(rename = "refill-per-sec")]
    pub refill_per_sec: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 5.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Continuously refilling token bucket; starts full
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: &BucketConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: &BucketConfig, now: Instant) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            capacity,
            refill_per_sec: config.refill_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Take one token, or report how long until one is available
    pub fn try_take(&self) -> Result<(), Duration> {
        self.try_take_at(Instant::now())
    }

    pub fn try_take_at(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, now);
        if state.tokens + TOKEN_EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            return Ok(());
        }
        let missing = 1.0 - state.tokens;
        Err(Duration::try_from_secs_f64(missing / self.refill_per_sec).unwrap_or(Duration::MAX))
    }

    /// Tokens currently available
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, Instant::now());
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(capacity: u32, refill_per_sec: f64) -> BucketConfig {
        BucketConfig {
            capacity,
            refill_per_sec,
        }
    }

    #[test]
    fn test_starts_full_then_drains() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(&config(3, 1.0), now);
        assert!(bucket.try_take_at(now).is_ok());
        assert!(bucket.try_take_at(now).is_ok());
        assert!(bucket.try_take_at(now).is_ok());
        let wait = bucket.try_take_at(now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[test]
    fn test_refills_over_time_up_to_capacity() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(&config(2, 2.0), now);
        bucket.try_take_at(now).unwrap();
        bucket.try_take_at(now).unwrap();
        assert!(bucket.try_take_at(now).is_err());

        let later = now + Duration::from_millis(500);
        assert!(bucket.try_take_at(later).is_ok());
        assert!(bucket.try_take_at(later).is_err());

        // Long idle never overfills
        let much_later = now + Duration::from_secs(3600);
        assert!(bucket.try_take_at(much_later).is_ok());
        assert!(bucket.try_take_at(much_later).is_ok());
        assert!(bucket.try_take_at(much_later).is_err());
    }

    #[test]
    fn test_zero_capacity_never_grants() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(&config(0, 10.0), now);
        assert!(bucket.try_take_at(now + Duration::from_secs(10)).is_err());
    }

    #[test]
    fn test_tiny_refill_saturates_wait() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(&config(1, 1e-20), now);
        assert!(bucket.try_take_at(now).is_ok());
        assert_eq!(bucket.try_take_at(now).unwrap_err(), Duration::MAX);
    }

    proptest! {
        #[test]
        fn acquisitions_bounded_by_window(
            capacity in 1u32..20,
            refill_per_sec in 0.5f64..50.0,
            offsets_ms in prop::collection::vec(0u64..5_000, 1..300),
        ) {
            let start = Instant::now();
            let bucket = TokenBucket::new_at(&config(capacity, refill_per_sec), start);
            let mut offsets = offsets_ms;
            offsets.sort_unstable();

            let mut granted = 0u64;
            for ms in &offsets {
                if bucket.try_take_at(start + Duration::from_millis(*ms)).is_ok() {
                    granted += 1;
                }
            }
            let window = offsets.last().copied().unwrap_or(0) as f64 / 1000.0;
            let bound = f64::from(capacity) + (window * refill_per_sec).ceil();
            prop_assert!(granted as f64 <= bound);

            let available = bucket.available();
            prop_assert!(available >= 0.0 && available <= f64::from(capacity));
        }
    }
}
