//! Scripted dispatch loop.
//!
//! Replays a list of requests and canned responses through a
//! [`Ratelimiter`], driving it the way a REST client's event loop would:
//! requests are queued by route key, each bucket dispatches one request at
//! a time, exhausted buckets are parked on a timer, and every response is
//! fed back to reconcile and refresh bucket state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bucket::BucketId;
use crate::clock::{Clock, ManualClock, SystemClock};
use crate::config::RatelimitConfig;
use crate::error::{RatelimitError, RatelimitResult};
use crate::metrics::RatelimitStats;
use crate::query::QueryString;
use crate::ratelimiter::Ratelimiter;
use crate::request::{PendingRequest, RecyclingQueue, Request, RequestId};
use crate::route::{Method, Route, RouteKey, Segment};
use crate::timer::TimerQueue;

const QUERY_CAPACITY: usize = 1024;

/// Canned server reply
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptResponse {
    pub headers: HashMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptRequest {
    pub method: Method,
    pub route: Vec<Segment>,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub high_priority: bool,
    /// Delay after replay start before the request is issued
    #[serde(default, with = "humantime_serde")]
    pub at: Duration,
    #[serde(default)]
    pub response: ScriptResponse,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub requests: Vec<ScriptRequest>,
}

impl Script {
    pub fn from_json_str(json: &str) -> RatelimitResult<Self> {
        let script: Script = serde_json::from_str(json)?;
        if script.requests.is_empty() {
            return Err(RatelimitError::Script(
                "script has no requests".to_string(),
            ));
        }
        Ok(script)
    }

    pub fn from_path(path: impl AsRef<Path>) -> RatelimitResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// One request leaving its bucket
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub request: RequestId,
    pub path: String,
    pub bucket: String,
    /// Milliseconds since replay start
    pub at_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub dispatched: Vec<DispatchRecord>,
    pub stats: RatelimitStats,
    pub cancelled: usize,
    pub recycled: usize,
}

enum ReplayClock {
    Virtual(ManualClock),
    Realtime,
}

struct InFlight {
    done_at: u64,
    bucket: BucketId,
    request: Request,
    response: ScriptResponse,
}

pub struct Replay {
    ratelimiter: Ratelimiter<Request>,
    timers: TimerQueue,
    clock: Arc<dyn Clock>,
    mode: ReplayClock,
    started_ms: u64,
}

impl Replay {
    /// Replay on a simulated clock that jumps straight to the next event
    pub fn virtual_time(config: RatelimitConfig, start_ms: u64) -> Self {
        let clock = ManualClock::new(start_ms);
        Self::with_clock(config, Arc::new(clock.clone()), ReplayClock::Virtual(clock))
    }

    /// Replay against the system clock, sleeping between events
    pub fn realtime(config: RatelimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock), ReplayClock::Realtime)
    }

    fn with_clock(config: RatelimitConfig, clock: Arc<dyn Clock>, mode: ReplayClock) -> Self {
        Self {
            ratelimiter: Ratelimiter::new(config, clock.clone()),
            timers: TimerQueue::new(clock.clone()),
            started_ms: clock.now_ms(),
            clock,
            mode,
        }
    }

    pub fn ratelimiter(&self) -> &Ratelimiter<Request> {
        &self.ratelimiter
    }

    fn build_request(&self, id: u64, entry: &ScriptRequest) -> RatelimitResult<Request> {
        let route = Route {
            method: entry.method,
            segments: entry.route.clone(),
        };
        let key = route.try_key_with_capacity(self.ratelimiter.config().route_key_capacity)?;

        let mut query = QueryString::new(QUERY_CAPACITY);
        for (name, value) in &entry.query {
            query.add(name, value)?;
        }

        Ok(Request::new(RequestId(id), route, key)
            .with_query(query.as_str())
            .with_high_priority(entry.high_priority))
    }

    async fn advance_to(&self, ms: u64) {
        match &self.mode {
            ReplayClock::Virtual(clock) => clock.set_ms(ms),
            ReplayClock::Realtime => {
                let wait = ms.saturating_sub(self.clock.now_ms());
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
        }
    }

    /// Run the script to completion and tear the ratelimiter down.
    pub async fn run(mut self, script: Script) -> RatelimitResult<ReplayReport> {
        let mut arrivals = Vec::with_capacity(script.requests.len());
        for (id, entry) in script.requests.into_iter().enumerate() {
            let request = self.build_request(id as u64, &entry)?;
            arrivals.push((self.started_ms + entry.at.as_millis() as u64, request, entry.response));
        }
        // stable, so equal arrival times keep script order
        arrivals.sort_by_key(|(at, _, _)| *at);
        let mut arrivals = arrivals.into_iter().peekable();

        let mut responses: HashMap<RequestId, ScriptResponse> = HashMap::new();
        let mut in_flight: Vec<InFlight> = Vec::new();
        let mut dispatched = Vec::new();

        loop {
            let now = self.clock.now_ms();

            while let Some((_, request, response)) = arrivals.next_if(|(at, _, _)| *at <= now) {
                let bucket = self.ratelimiter.get(request.route_key().as_str());
                let high_priority = request.is_high_priority();
                responses.insert(request.id(), response);
                self.ratelimiter.add_request(bucket, request, high_priority);
            }

            for event in self.timers.pop_due() {
                self.ratelimiter.fire(event);
            }

            let (done, waiting): (Vec<_>, Vec<_>) =
                in_flight.into_iter().partition(|f| f.done_at <= now);
            in_flight = waiting;
            for flight in done {
                let key: &RouteKey = flight.request.route_key();
                self.ratelimiter
                    .build(flight.bucket, key, &flight.response.headers);
                self.ratelimiter
                    .finish_request(flight.bucket, flight.request.id());
            }

            let ids: Vec<BucketId> = self.ratelimiter.bucket_ids().collect();
            for id in ids {
                let bucket = self.ratelimiter.bucket(id);
                if bucket.is_busy() || !bucket.has_pending() {
                    continue;
                }

                if self.ratelimiter.get_timeout(id) > now {
                    self.ratelimiter.try_timeout(id, &mut self.timers);
                    continue;
                }

                if let Some(request) = self.ratelimiter.start_request(id) {
                    let response = responses.remove(&request.id()).unwrap_or_default();
                    debug!(
                        request = %request.id(),
                        path = %request.path(),
                        bucket = %self.ratelimiter.bucket(id).hash(),
                        "Dispatching request"
                    );
                    dispatched.push(DispatchRecord {
                        request: request.id(),
                        path: request.path().to_string(),
                        bucket: self.ratelimiter.bucket(id).hash().to_string(),
                        at_ms: now - self.started_ms,
                    });
                    in_flight.push(InFlight {
                        done_at: now + response.latency.as_millis() as u64,
                        bucket: id,
                        request,
                        response,
                    });
                }
            }

            let next = [
                arrivals.peek().map(|(at, _, _)| *at),
                self.timers.next_deadline(),
                in_flight.iter().map(|f| f.done_at).min(),
            ]
            .into_iter()
            .flatten()
            .min();

            match next {
                Some(next) => self.advance_to(next.max(now)).await,
                None => {
                    let stats = self.ratelimiter.stats();
                    if stats.queued() > 0 {
                        warn!(queued = stats.queued(), "Replay stalled with queued requests");
                    }
                    break;
                }
            }
        }

        let stats = self.ratelimiter.stats();
        let mut recycling = RecyclingQueue::new();
        self.ratelimiter.cleanup(&mut recycling);

        Ok(ReplayReport {
            dispatched,
            stats,
            cancelled: recycling.cancelled.len(),
            recycled: recycling.recycled.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_parsing() {
        let script = Script::from_json_str(
            r#"{
                "requests": [
                    {
                        "method": "GET",
                        "route": [{"literal": "channels"}, {"id": 7}, {"literal": "messages"}],
                        "query": [["limit", "50"]],
                        "at": "150ms",
                        "response": {
                            "headers": {"x-ratelimit-bucket": "abc"},
                            "latency": "20ms"
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        let entry = &script.requests[0];
        assert_eq!(entry.method, Method::Get);
        assert_eq!(entry.at, Duration::from_millis(150));
        assert_eq!(entry.response.latency, Duration::from_millis(20));
        assert!(!entry.high_priority);
    }

    #[test]
    fn test_empty_script_rejected() {
        let result = Script::from_json_str(r#"{"requests": []}"#);
        assert!(matches!(result, Err(RatelimitError::Script(_))));
    }

    #[test]
    fn test_build_request_with_query() {
        let replay = Replay::virtual_time(RatelimitConfig::default(), 0);
        let entry: ScriptRequest = serde_json::from_str(
            r#"{"method": "GET", "route": [{"literal": "guilds"}, {"id": 3}, {"literal": "bans"}],
                "query": [["limit", "10"], ["after", "99"]]}"#,
        )
        .unwrap();

        let request = replay.build_request(5, &entry).unwrap();
        assert_eq!(request.path(), "/guilds/3/bans?limit=10&after=99");
        assert_eq!(request.route_key().as_str(), ":1:guilds:3:bans");
        assert_eq!(request.id(), RequestId(5));
    }
}
