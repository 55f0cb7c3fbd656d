use serde::Serialize;

use crate::bucket::{Bucket, BucketId, BucketState};
use crate::request::PendingRequest;

/// Point-in-time view of one bucket
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub id: BucketId,
    pub hash: String,
    /// `None` when unbounded
    pub limit: Option<i64>,
    pub remaining: i64,
    pub reset_tstamp: u64,
    pub queued: usize,
    #[serde(flatten)]
    pub state: BucketState,
}

impl BucketSnapshot {
    pub fn from_bucket<R: PendingRequest>(bucket: &Bucket<R>) -> Self {
        Self {
            id: bucket.id(),
            hash: bucket.hash().to_string(),
            limit: (!bucket.is_unbounded()).then_some(bucket.limit()),
            remaining: bucket.remaining(),
            reset_tstamp: bucket.reset_tstamp(),
            queued: bucket.pending_len(),
            state: bucket.state(),
        }
    }
}

/// Point-in-time view of a whole ratelimiter
#[derive(Debug, Clone, Serialize)]
pub struct RatelimitStats {
    pub now_ms: u64,
    pub global_wait_ms: u64,
    /// Route keys bound to a bucket, singletons included
    pub routes: usize,
    pub buckets: Vec<BucketSnapshot>,
}

impl RatelimitStats {
    pub fn queued(&self) -> usize {
        self.buckets.iter().map(|b| b.queued).sum()
    }

    pub fn busy(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| b.state != BucketState::Idle)
            .count()
    }

    pub fn is_globally_locked(&self) -> bool {
        self.global_wait_ms > self.now_ms
    }
}
