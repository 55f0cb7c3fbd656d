use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use crate::request::{PendingRequest, RequestId};

/// Handle to a bucket owned by a [`Ratelimiter`](crate::Ratelimiter)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BucketId(pub(crate) usize);

impl BucketId {
    /// Requests whose bucket is not known yet
    pub const NULL: BucketId = BucketId(0);
    /// Routes that aren't part of any ratelimit group
    pub const MISS: BucketId = BucketId(1);

    pub fn is_singleton(self) -> bool {
        self == Self::NULL || self == Self::MISS
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a bucket may hand out its next request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "request")]
pub enum BucketState {
    Idle,
    /// A request from this bucket is in flight
    Performing(RequestId),
    /// Waiting on a scheduled wakeup
    TimeoutPending,
}

/// Client-side state for one server ratelimit group.
#[derive(Debug)]
pub struct Bucket<R> {
    id: BucketId,
    hash: String,
    pub(crate) limit: i64,
    pub(crate) remaining: i64,
    /// Unix ms at which quota refills; only meaningful while `remaining < 1`
    pub(crate) reset_tstamp: u64,
    pub(crate) state: BucketState,
    pub(crate) pending_queue: VecDeque<R>,
}

impl<R: PendingRequest> Bucket<R> {
    pub(crate) fn new(id: BucketId, hash: impl Into<String>, limit: i64) -> Self {
        Self {
            id,
            hash: hash.into(),
            limit,
            // first request through a fresh bucket always gets attempted
            remaining: 1,
            reset_tstamp: 0,
            state: BucketState::Idle,
            pending_queue: VecDeque::new(),
        }
    }

    pub fn id(&self) -> BucketId {
        self.id
    }

    /// Server-assigned bucket hash, or `null` / `miss` for the singletons
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Leading characters of the hash, enough to tell buckets apart in logs
    pub(crate) fn short_hash(&self) -> &str {
        self.hash.get(..4).unwrap_or(&self.hash)
    }

    /// Maximum requests per window; `i64::MAX` when unbounded
    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit == i64::MAX
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn reset_tstamp(&self) -> u64 {
        self.reset_tstamp
    }

    /// Reset time if the quota is used up, zero otherwise
    pub fn exhausted_until(&self) -> u64 {
        if self.remaining < 1 {
            self.reset_tstamp
        } else {
            0
        }
    }

    pub fn state(&self) -> BucketState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != BucketState::Idle
    }

    pub fn pending_len(&self) -> usize {
        self.pending_queue.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_queue.is_empty()
    }

    /// Queued requests, head first
    pub fn pending(&self) -> impl Iterator<Item = &R> {
        self.pending_queue.iter()
    }

    /// Queue a request, at the head when `high_priority`.
    pub fn add_request(&mut self, mut request: R, high_priority: bool) {
        request.bind_bucket(self.id);
        if high_priority {
            self.pending_queue.push_front(request);
        } else {
            self.pending_queue.push_back(request);
        }
    }

    /// Pop the head of the queue; the caller owns the returned request.
    pub fn remove_request(&mut self) -> Option<R> {
        self.pending_queue.pop_front()
    }

    /// Release the bucket after its reset time passed.
    pub(crate) fn wake(&mut self) {
        self.state = BucketState::Idle;
        self.remaining = 1;
    }
}
