//! Requests as seen by the ratelimiter, and the collaborators that own them
//! once they leave a bucket.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use crate::bucket::BucketId;
use crate::route::{Method, Route, RouteKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request that can wait in a bucket's queue.
pub trait PendingRequest {
    fn id(&self) -> RequestId;

    /// Key the request was routed by; matched during reconciliation
    fn route_key(&self) -> &RouteKey;

    /// Record the bucket whose queue now holds this request
    fn bind_bucket(&mut self, bucket: BucketId);

    fn bucket(&self) -> Option<BucketId>;
}

/// Receives whatever a bucket still holds when the ratelimiter shuts down.
pub trait Requestor<R> {
    /// Abort the transfer of a request that is currently in flight
    fn cancel_inflight(&mut self, request: RequestId);

    /// Take back a request that never got dispatched
    fn recycle(&mut self, request: R);
}

/// Outgoing API request record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    id: RequestId,
    route: Route,
    key: RouteKey,
    path: String,
    bucket: Option<BucketId>,
    high_priority: bool,
}

impl Request {
    pub fn new(id: RequestId, route: Route, key: RouteKey) -> Self {
        let path = route.path();
        Self {
            id,
            route,
            key,
            path,
            bucket: None,
            high_priority: false,
        }
    }

    /// Append an encoded query string (as produced by
    /// [`QueryString`](crate::query::QueryString)) to the path
    pub fn with_query(mut self, query: &str) -> Self {
        self.path.push_str(query);
        self
    }

    pub fn with_high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    pub fn method(&self) -> Method {
        self.route.method
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Endpoint path including any query string
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_high_priority(&self) -> bool {
        self.high_priority
    }
}

impl PendingRequest for Request {
    fn id(&self) -> RequestId {
        self.id
    }

    fn route_key(&self) -> &RouteKey {
        &self.key
    }

    fn bind_bucket(&mut self, bucket: BucketId) {
        self.bucket = Some(bucket);
    }

    fn bucket(&self) -> Option<BucketId> {
        self.bucket
    }
}

/// Collects cancelled and recycled requests in arrival order.
#[derive(Debug)]
pub struct RecyclingQueue<R> {
    pub cancelled: Vec<RequestId>,
    pub recycled: VecDeque<R>,
}

impl<R> RecyclingQueue<R> {
    pub fn new() -> Self {
        Self {
            cancelled: Vec::new(),
            recycled: VecDeque::new(),
        }
    }
}

impl<R> Default for RecyclingQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Requestor<R> for RecyclingQueue<R> {
    fn cancel_inflight(&mut self, request: RequestId) {
        self.cancelled.push(request);
    }

    fn recycle(&mut self, request: R) {
        self.recycled.push_back(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_path_and_query() {
        let route = Route::new(Method::Get).lit("channels").id(9).lit("messages");
        let key = route.key();
        let request = Request::new(RequestId(1), route, key.clone()).with_query("?limit=50");

        assert_eq!(request.path(), "/channels/9/messages?limit=50");
        assert_eq!(request.route_key(), &key);
        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.bucket(), None);
        assert!(!request.is_high_priority());
    }

    #[test]
    fn test_recycling_queue_collects() {
        let mut queue: RecyclingQueue<u32> = RecyclingQueue::new();
        queue.cancel_inflight(RequestId(4));
        queue.recycle(1);
        queue.recycle(2);
        assert_eq!(queue.cancelled, vec![RequestId(4)]);
        assert_eq!(queue.recycled, VecDeque::from(vec![1, 2]));
    }
}
