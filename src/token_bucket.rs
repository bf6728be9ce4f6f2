use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::clock::Clock;

/// Capacity and refill rate shared by every client bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketPolicy {
    pub capacity: u64,
    pub fill_rate: f64, // tokens per second
}

impl Default for BucketPolicy {
    fn default() -> Self {
        Self {
            capacity: 1000,
            fill_rate: 3.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client token counter with lazy refill.
///
/// Every read refills first, so `available` and `take_available` both
/// advance the refill instant.
pub struct TokenBucket {
    capacity: u64,
    fill_rate: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(policy: BucketPolicy, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            capacity: policy.capacity,
            fill_rate: policy.fill_rate,
            clock,
            state: Mutex::new(BucketState {
                tokens: policy.capacity as f64,
                last_refill: now,
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn fill_rate(&self) -> f64 {
        self.fill_rate
    }

    /// Whole tokens currently available.
    pub fn available(&self) -> u64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.tokens.floor() as u64
    }

    /// Removes up to `n` tokens and returns how many were removed.
    ///
    /// When fewer than `n` are available the bucket is still drained to
    /// zero; a denied caller pays for what it got.
    pub fn take_available(&self, n: u64) -> u64 {
        let mut state = self.lock();
        self.refill(&mut state);

        let taken = (state.tokens.floor() as u64).min(n);
        state.tokens -= taken as f64;
        taken
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(state.last_refill);

        let tokens_to_add = self.fill_rate * elapsed.as_secs_f64();
        state.tokens = (state.tokens + tokens_to_add).min(self.capacity as f64);
        state.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        // Bucket arithmetic cannot leave the state half-written.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("fill_rate", &self.fill_rate)
            .finish_non_exhaustive()
    }
}
