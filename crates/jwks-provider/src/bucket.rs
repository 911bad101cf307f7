//! Token bucket guaranteeing a fixed amount of tokens per refill rate.
//!
//! The bucket starts full. One token is regenerated every `refill_interval`
//! up to `capacity`. Time between token boundaries is carried over from one
//! refill pass to the next, so frequent checks never lose fractional
//! progress toward the next token.
//!
//! All operations go through a single mutex per bucket. The critical section
//! is pure arithmetic and never spans I/O.
//!
//! Time is read from `tokio::time::Instant`, which follows the paused test
//! clock when tokio's `test-util` feature is enabled.

use crate::error::{JwksError, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Default bucket capacity used by the pipeline builder.
pub const DEFAULT_BUCKET_CAPACITY: u64 = 10;

/// Default time to regenerate one token (one token per minute).
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(60);

/// Mutable timing state, only touched under the bucket lock.
#[derive(Debug)]
struct BucketState {
    available: u64,
    last_refill: Instant,
    carry: Duration,
}

/// Token bucket rate limiter.
///
/// One instance is one rate-limit domain. Share it with `Arc` to make
/// several pipelines draw from the same budget.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of tokens held
    /// * `refill_interval` - Time needed to regenerate a single token
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if `capacity` is zero or
    /// `refill_interval` is zero.
    pub fn new(capacity: u64, refill_interval: Duration) -> Result<Self> {
        if capacity < 1 {
            return Err(JwksError::InvalidConfiguration(
                "Invalid bucket size.".to_string(),
            ));
        }
        if refill_interval.is_zero() {
            return Err(JwksError::InvalidConfiguration(
                "Invalid bucket refill rate.".to_string(),
            ));
        }

        Ok(Self {
            capacity,
            refill_interval,
            state: Mutex::new(BucketState {
                available: capacity,
                last_refill: Instant::now(),
                carry: Duration::ZERO,
            }),
        })
    }

    /// Maximum number of tokens this bucket holds.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Time needed to regenerate a single token.
    #[must_use]
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Try to take `count` tokens.
    ///
    /// Returns `true` and removes the tokens if enough are available after
    /// applying owed refill, `false` otherwise (nothing is removed).
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if `count` is outside
    /// `[1, capacity]`.
    pub fn consume(&self, count: u64) -> Result<bool> {
        self.check_count(count)?;

        let mut state = self.lock();
        self.refill(&mut state, Instant::now());

        if count <= state.available {
            state.available -= count;
            trace!(
                target: "jwks.bucket",
                count,
                available = state.available,
                "Tokens consumed"
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Time until `count` tokens can be consumed.
    ///
    /// Zero when the tokens are already available. Otherwise the remaining
    /// time to the next token boundary plus one full interval per additional
    /// token needed beyond that one.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if `count` is outside
    /// `[1, capacity]`.
    pub fn time_until_available(&self, count: u64) -> Result<Duration> {
        self.check_count(count)?;

        let now = Instant::now();
        let mut state = self.lock();
        self.refill(&mut state, now);
        Ok(self.wait_for(&state, now, count))
    }

    /// Take `count` tokens, or report how long until they are available.
    ///
    /// The decision and the wait are computed under one lock, so a rejection
    /// always carries a non-zero wait consistent with the state that caused
    /// it.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if `count` is outside
    /// `[1, capacity]`.
    pub fn try_acquire(&self, count: u64) -> Result<std::result::Result<(), Duration>> {
        self.check_count(count)?;

        let now = Instant::now();
        let mut state = self.lock();
        self.refill(&mut state, now);

        if count <= state.available {
            state.available -= count;
            trace!(
                target: "jwks.bucket",
                count,
                available = state.available,
                "Tokens acquired"
            );
            return Ok(Ok(()));
        }

        Ok(Err(self.wait_for(&state, now, count)))
    }

    /// Tokens available right now, after applying owed refill.
    #[must_use]
    pub fn available(&self) -> u64 {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        state.available
    }

    /// Wait for `count` tokens given freshly refilled `state`.
    fn wait_for(&self, state: &BucketState, now: Instant, count: u64) -> Duration {
        if state.available >= count {
            return Duration::ZERO;
        }

        // After a refill pass the progress toward the next token is always
        // below one interval.
        let progress = now.saturating_duration_since(state.last_refill) + state.carry;
        let mut wait = self.refill_interval.saturating_sub(progress);

        let remaining = count - state.available - 1;
        if remaining > 0 {
            wait += self.interval_times(remaining);
        }
        wait
    }

    fn check_count(&self, count: u64) -> Result<()> {
        if count < 1 || count > self.capacity {
            return Err(JwksError::InvalidConfiguration(format!(
                "Cannot consume {count} tokens when the bucket size is {}!",
                self.capacity
            )));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // The critical section cannot panic, but a poisoned lock still holds
        // consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill) + state.carry;
        if elapsed < self.refill_interval {
            return;
        }

        let interval_nanos = self.refill_interval.as_nanos();
        let elapsed_nanos = elapsed.as_nanos();
        let new_tokens = elapsed_nanos / interval_nanos;
        let remainder = elapsed_nanos % interval_nanos;

        let room = self.capacity - state.available;
        let credited = u64::try_from(new_tokens).map_or(room, |n| n.min(room));
        state.available += credited;
        // remainder < interval, which itself fits in a Duration
        state.carry = Duration::from_nanos(u64::try_from(remainder).unwrap_or(u64::MAX));
        state.last_refill = now;

        if credited > 0 {
            trace!(
                target: "jwks.bucket",
                credited,
                available = state.available,
                "Bucket refilled"
            );
        }
    }

    fn interval_times(&self, count: u64) -> Duration {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.refill_interval.saturating_mul(count)
    }
}
