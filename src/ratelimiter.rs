//! Bucket registry and the header-driven ratelimit protocol.
//!
//! Requests are matched to buckets by route key. Until a response reveals
//! which server bucket a key belongs to, its requests wait in the `null`
//! singleton; the first response for that key creates (or finds) the real
//! bucket and migrates the matching requests over.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::bucket::{Bucket, BucketId, BucketState};
use crate::clock::Clock;
use crate::config::RatelimitConfig;
use crate::headers::{parse_http_date, RatelimitHeaders, ResponseHeaders};
use crate::metrics::{BucketSnapshot, RatelimitStats};
use crate::request::{PendingRequest, RequestId, Requestor};
use crate::route::{Route, RouteKey};
use crate::timer::{TimerEvent, TimerScheduler};

const LOG_TARGET: &str = "rest_ratelimit::ratelimit";

/// Registry of buckets keyed by route, plus the global throttle.
///
/// `null` and `miss` are created with the registry and live as long as it.
pub struct Ratelimiter<R> {
    config: RatelimitConfig,
    clock: Arc<dyn Clock>,
    /// Bucket arena; `BucketId` indexes into it
    buckets: Vec<Bucket<R>>,
    routes: HashMap<RouteKey, BucketId>,
    /// Server hash to bucket, so routes sharing a hash share quota
    hashes: HashMap<String, BucketId>,
    /// Unix ms until which every bucket is paused
    global_wait_ms: u64,
}

impl<R: PendingRequest> Ratelimiter<R> {
    pub fn new(config: RatelimitConfig, clock: Arc<dyn Clock>) -> Self {
        let mut ratelimiter = Self {
            config,
            clock,
            buckets: Vec::new(),
            routes: HashMap::new(),
            hashes: HashMap::new(),
            global_wait_ms: 0,
        };

        let null = ratelimiter.insert_bucket(RouteKey::from(RouteKey::NULL), RouteKey::NULL, 1);
        let miss =
            ratelimiter.insert_bucket(RouteKey::from(RouteKey::MISS), RouteKey::MISS, i64::MAX);
        debug_assert_eq!(null, BucketId::NULL);
        debug_assert_eq!(miss, BucketId::MISS);

        ratelimiter
    }

    fn insert_bucket(&mut self, key: RouteKey, hash: &str, limit: i64) -> BucketId {
        let id = BucketId(self.buckets.len());
        self.buckets.push(Bucket::new(id, hash, limit));
        self.routes.insert(key, id);
        id
    }

    pub fn config(&self) -> &RatelimitConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Route key for `route` under the configured capacity.
    ///
    /// # Panics
    ///
    /// Panics if the key overflows the capacity (a malformed route).
    pub fn key_for(&self, route: &Route) -> RouteKey {
        route.key_with_capacity(self.config.route_key_capacity)
    }

    /// Exact lookup, without falling back to `null`
    pub fn find(&self, key: &str) -> Option<BucketId> {
        self.routes.get(key).copied()
    }

    /// Bucket matched to `key`, or the `null` singleton when unknown
    pub fn get(&self, key: &str) -> BucketId {
        match self.find(key) {
            Some(id) => {
                trace!(
                    target: LOG_TARGET,
                    bucket = %self.buckets[id.0].short_hash(),
                    key = %key,
                    "Found a bucket match"
                );
                id
            }
            None => {
                trace!(target: LOG_TARGET, key = %key, "[null] Couldn't match known buckets");
                BucketId::NULL
            }
        }
    }

    /// Bucket behind a handle issued by this ratelimiter.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a different ratelimiter.
    pub fn bucket(&self, id: BucketId) -> &Bucket<R> {
        &self.buckets[id.0]
    }

    pub fn bucket_mut(&mut self, id: BucketId) -> &mut Bucket<R> {
        &mut self.buckets[id.0]
    }

    pub fn null(&self) -> &Bucket<R> {
        self.bucket(BucketId::NULL)
    }

    pub fn miss(&self) -> &Bucket<R> {
        self.bucket(BucketId::MISS)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket_ids(&self) -> impl Iterator<Item = BucketId> + '_ {
        self.buckets.iter().map(Bucket::id)
    }

    pub fn global_wait_ms(&self) -> u64 {
        self.global_wait_ms
    }

    /// Visit every bucket once, singletons included
    pub fn foreach_bucket<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Bucket<R>),
    {
        for bucket in &mut self.buckets {
            visit(bucket);
        }
    }

    /// Bucket for `key`, created from the response headers if needed.
    ///
    /// A response without a bucket hash binds the key to `miss` for good.
    pub fn resolve_or_create<H>(&mut self, key: &RouteKey, headers: &H) -> BucketId
    where
        H: ResponseHeaders + ?Sized,
    {
        let id = match self.find(key.as_str()) {
            Some(id) => id,
            None => {
                let parsed = RatelimitHeaders::parse(headers, &self.config.headers);
                match parsed.bucket {
                    None => {
                        self.routes.insert(key.clone(), BucketId::MISS);
                        BucketId::MISS
                    }
                    Some(hash) => {
                        let limit = parsed.limit.unwrap_or(i64::MAX);
                        match self.hashes.get(hash).copied() {
                            Some(id) => {
                                if parsed.limit.is_some() {
                                    self.buckets[id.0].limit = limit;
                                }
                                self.routes.insert(key.clone(), id);
                                id
                            }
                            None => {
                                let id = self.insert_bucket(key.clone(), hash, limit);
                                self.hashes.insert(hash.to_string(), id);
                                id
                            }
                        }
                    }
                }
            }
        };

        debug!(
            target: LOG_TARGET,
            bucket = %self.buckets[id.0].short_hash(),
            key = %key,
            "Match route to bucket"
        );

        id
    }

    /// Next time dispatch through the bucket is allowed, zero if now
    pub fn get_timeout(&self, id: BucketId) -> u64 {
        self.global_wait_ms.max(self.buckets[id.0].exhausted_until())
    }

    /// Refresh quota and reset time from a response.
    pub fn populate<H>(&mut self, id: BucketId, headers: &H)
    where
        H: ResponseHeaders + ?Sized,
    {
        let parsed = RatelimitHeaders::parse(headers, &self.config.headers);
        let now = self.clock.now_ms();
        let bucket = &mut self.buckets[id.0];

        // Missing header means quota is available, not exhausted
        bucket.remaining = parsed.remaining.unwrap_or(1);

        if let Some(reset_after) = parsed.reset_after {
            let reset_tstamp = now.saturating_add(seconds_to_ms(reset_after));

            if parsed.global {
                self.global_wait_ms = reset_tstamp;
                info!(
                    target: LOG_TARGET,
                    bucket = %bucket.short_hash(),
                    until = reset_tstamp,
                    "Global ratelimit hit, pausing every bucket"
                );
            } else {
                bucket.reset_tstamp = reset_tstamp;
            }
        } else if let Some(reset) = parsed.reset {
            // Server time plus the sub-second part the date header drops
            let offset = match parsed.date.and_then(parse_http_date) {
                Some(server_ms) => server_ms + now % 1000,
                None => now,
            };
            let reset_ms = seconds_to_ms(reset);
            bucket.reset_tstamp = (now as i128 + reset_ms as i128 - offset as i128)
                .clamp(0, u64::MAX as i128) as u64;
        }

        debug!(
            target: LOG_TARGET,
            bucket = %bucket.short_hash(),
            remaining = bucket.remaining,
            reset = bucket.reset_tstamp,
            "Populated bucket"
        );
    }

    /// Move requests waiting in `null` under `key` to the tail of `target`.
    ///
    /// Relative order is kept on both sides.
    fn null_filter(&mut self, target: BucketId, key: &RouteKey) -> usize {
        if target == BucketId::NULL {
            return 0;
        }

        let queue = std::mem::take(&mut self.buckets[BucketId::NULL.0].pending_queue);
        let mut moved = 0;

        for mut request in queue {
            if request.route_key() == key {
                request.bind_bucket(target);
                self.buckets[target.0].pending_queue.push_back(request);
                moved += 1;
            } else {
                self.buckets[BucketId::NULL.0].pending_queue.push_back(request);
            }
        }

        if moved > 0 {
            debug!(
                target: LOG_TARGET,
                bucket = %self.buckets[target.0].short_hash(),
                key = %key,
                moved,
                "Moved requests out of null"
            );
        }

        moved
    }

    /// Apply a response to the bucket its request was dispatched through.
    ///
    /// Requests dispatched through `null` first get their real bucket
    /// resolved, and every queued request sharing their key follows.
    /// Returns the bucket that was populated.
    pub fn build<H>(&mut self, id: BucketId, key: &RouteKey, headers: &H) -> BucketId
    where
        H: ResponseHeaders + ?Sized,
    {
        let id = if id == BucketId::NULL {
            let resolved = self.resolve_or_create(key, headers);
            self.null_filter(resolved, key);
            resolved
        } else {
            id
        };

        self.populate(id, headers);
        id
    }

    /// Block the bucket until its reset time and schedule the wakeup.
    pub fn try_timeout<S>(&mut self, id: BucketId, scheduler: &mut S)
    where
        S: TimerScheduler + ?Sized,
    {
        let now = self.clock.now_ms();
        let delay_ms = self.get_timeout(id).saturating_sub(now);
        let bucket = &mut self.buckets[id.0];

        bucket.state = BucketState::TimeoutPending;
        scheduler.schedule(
            Duration::from_millis(delay_ms),
            TimerEvent::WakeBucket(id),
        );

        info!(
            target: LOG_TARGET,
            bucket = %bucket.short_hash(),
            wait_ms = delay_ms,
            "RATELIMITING"
        );
    }

    /// Handle a fired timer
    pub fn fire(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::WakeBucket(id) => {
                let bucket = &mut self.buckets[id.0];
                bucket.wake();
                trace!(target: LOG_TARGET, bucket = %bucket.short_hash(), "Bucket woke up");
            }
        }
    }

    pub fn add_request(&mut self, id: BucketId, request: R, high_priority: bool) {
        self.buckets[id.0].add_request(request, high_priority);
    }

    pub fn remove_request(&mut self, id: BucketId) -> Option<R> {
        self.buckets[id.0].remove_request()
    }

    /// Pop the head request and mark it in flight.
    ///
    /// Returns `None` if the bucket is busy or has nothing queued.
    pub fn start_request(&mut self, id: BucketId) -> Option<R> {
        let bucket = &mut self.buckets[id.0];
        if bucket.is_busy() {
            return None;
        }
        let request = bucket.remove_request()?;
        bucket.state = BucketState::Performing(request.id());
        Some(request)
    }

    /// Clear the in-flight marker left by [`Ratelimiter::start_request`]
    pub fn finish_request(&mut self, id: BucketId, request: RequestId) {
        let bucket = &mut self.buckets[id.0];
        if bucket.state == BucketState::Performing(request) {
            bucket.state = BucketState::Idle;
        }
    }

    pub fn stats(&self) -> RatelimitStats {
        RatelimitStats {
            now_ms: self.clock.now_ms(),
            global_wait_ms: self.global_wait_ms,
            routes: self.routes.len(),
            buckets: self.buckets.iter().map(BucketSnapshot::from_bucket).collect(),
        }
    }

    /// Tear down: cancel in-flight requests and hand queued ones back.
    pub fn cleanup<Q>(mut self, requestor: &mut Q)
    where
        Q: Requestor<R> + ?Sized,
    {
        let mut cancelled = 0;
        let mut recycled = 0;

        self.foreach_bucket(|bucket| {
            if let BucketState::Performing(request) = bucket.state {
                requestor.cancel_inflight(request);
                cancelled += 1;
            }
            bucket.state = BucketState::Idle;

            for request in bucket.pending_queue.drain(..) {
                requestor.recycle(request);
                recycled += 1;
            }
        });

        info!(
            target: LOG_TARGET,
            buckets = self.buckets.len(),
            cancelled,
            recycled,
            "Ratelimiter cleaned up"
        );
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0) as u64
    } else {
        0
    }
}
