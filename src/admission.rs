//! Per-client admission control.
//!
//! Every client identifier gets one [`TokenBucket`], created on first
//! contact and kept until a sweep finds it completely refilled.
//!
//! # Concurrency contract
//!
//! A charge looks the bucket up and debits it while still holding the
//! map's read lock. On a miss the write lock is taken, the map checked
//! again, and the new bucket charged before that lock is released.
//! First contacts are therefore the only requests that ever contend for
//! the write lock, apart from the sweep.
//!
//! The sweep holds the write lock for a whole pass. It cannot run while
//! any charge is in progress, so a bucket is never evicted between the
//! lookup and the debit.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::task::{PeriodicTask, TaskState};
use crate::token_bucket::{BucketPolicy, TokenBucket};

/// Result of charging a request against a client's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub taken: u64,
    pub remaining: u64,
}

impl Admission {
    fn debit(bucket: &TokenBucket, cost: u64) -> Self {
        let taken = bucket.take_available(cost);
        Self {
            allowed: taken >= cost,
            taken,
            remaining: bucket.available(),
        }
    }
}

type BucketMap = HashMap<String, Arc<TokenBucket>>;

#[derive(Clone)]
pub struct AdmissionRegistry {
    policy: BucketPolicy,
    clock: Arc<dyn Clock>,
    buckets: Arc<RwLock<BucketMap>>,
    sweep: Arc<PeriodicTask>,
}

impl AdmissionRegistry {
    pub fn new(policy: BucketPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: BucketPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            buckets: Arc::new(RwLock::new(HashMap::new())),
            sweep: Arc::new(PeriodicTask::new("bucket_sweep")),
        }
    }

    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }

    /// Returns the client's bucket, creating a full one on first contact.
    ///
    /// The handle outlives any later eviction of the entry. Admission
    /// decisions go through [`charge`](Self::charge) instead.
    pub fn get_or_create(&self, client_id: &str) -> Arc<TokenBucket> {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(client_id) {
                return Arc::clone(bucket);
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(self.insert_if_absent(&mut buckets, client_id))
    }

    /// Charges `cost` tokens to `client_id`.
    ///
    /// A denied charge still drains whatever the bucket held.
    pub fn charge(&self, client_id: &str, cost: u64) -> Admission {
        {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bucket) = buckets.get(client_id) {
                return Admission::debit(bucket, cost);
            }
        }

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = self.insert_if_absent(&mut buckets, client_id);
        Admission::debit(bucket, cost)
    }

    fn insert_if_absent<'a>(
        &self,
        buckets: &'a mut BucketMap,
        client_id: &str,
    ) -> &'a Arc<TokenBucket> {
        buckets.entry(client_id.to_string()).or_insert_with(|| {
            debug!(client_id = %client_id, "Creating token bucket");
            Arc::new(TokenBucket::new(self.policy, Arc::clone(&self.clock)))
        })
    }

    /// Whole seconds a client holding `remaining` tokens should wait
    /// before `cost` becomes affordable. Never less than one second;
    /// saturates at `u64::MAX` when the bucket refills too slowly to say.
    pub fn retry_after(&self, cost: u64, remaining: u64) -> u64 {
        let needed = cost.min(self.policy.capacity).saturating_sub(remaining);
        let secs = (needed as f64 / self.policy.fill_rate).ceil();
        if !secs.is_finite() || secs >= u64::MAX as f64 {
            return u64::MAX;
        }
        (secs as u64).max(1)
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One eviction pass: drops every bucket that has refilled to capacity.
    ///
    /// A bucket with any deficit is kept; recreating it would hand the
    /// client a full budget.
    pub fn sweep_once(&self) -> usize {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.available() < bucket.capacity());
        before - buckets.len()
    }

    pub fn sweep_state(&self) -> TaskState {
        self.sweep.state()
    }

    /// Starts the background sweep. Returns false if it was already
    /// started or has been stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweep(&self, every: Duration) -> bool {
        let registry = self.clone();
        self.sweep.start(every, move || {
            let evicted = registry.sweep_once();
            if evicted > 0 {
                debug!(evicted, remaining = registry.len(), "Sweep evicted idle buckets");
            }
            async {}
        })
    }

    /// Stops the sweep and waits for the task to exit. Safe to call in any
    /// state and more than once.
    pub async fn stop(&self) {
        self.sweep.stop().await;
    }
}
