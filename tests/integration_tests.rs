use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rest_ratelimit::{
    config::RatelimitConfig,
    replay::{Replay, ReplayReport, Script},
    request::RecyclingQueue,
    timer::TimerQueue,
    BucketId, ManualClock, Method, PendingRequest, Ratelimiter, Request, RequestId, Route,
};

const START: u64 = 1_700_000_000_000;

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn message_route(channel: u64) -> Route {
    Route::new(Method::Post)
        .lit("channels")
        .id(channel)
        .lit("messages")
}

fn new_request(ratelimiter: &Ratelimiter<Request>, id: u64, route: Route) -> Request {
    let key = ratelimiter.key_for(&route);
    Request::new(RequestId(id), route, key)
}

async fn replay(json: &str) -> ReplayReport {
    let script = Script::from_json_str(json).unwrap();
    Replay::virtual_time(RatelimitConfig::default(), START)
        .run(script)
        .await
        .unwrap()
}

fn order(report: &ReplayReport) -> Vec<(u64, &str, u64)> {
    report
        .dispatched
        .iter()
        .map(|d| (d.request.0, d.bucket.as_str(), d.at_ms))
        .collect()
}

#[tokio::test]
async fn test_unknown_route_waits_for_first_response() {
    let report = replay(
        r#"{"requests": [
            {"method": "POST", "route": [{"literal": "channels"}, {"id": 1}, {"literal": "messages"}],
             "response": {"headers": {"x-ratelimit-bucket": "abcd", "x-ratelimit-limit": "5",
                                      "x-ratelimit-remaining": "4"}, "latency": "10ms"}},
            {"method": "POST", "route": [{"literal": "channels"}, {"id": 1}, {"literal": "messages"}],
             "response": {"headers": {"x-ratelimit-bucket": "abcd", "x-ratelimit-remaining": "3"},
                          "latency": "10ms"}},
            {"method": "POST", "route": [{"literal": "channels"}, {"id": 1}, {"literal": "messages"}],
             "response": {"headers": {"x-ratelimit-bucket": "abcd", "x-ratelimit-remaining": "2"},
                          "latency": "10ms"}}
        ]}"#,
    )
    .await;

    assert_eq!(
        order(&report),
        vec![(0, "null", 0), (1, "abcd", 10), (2, "abcd", 20)]
    );
    assert_eq!(report.stats.buckets.len(), 3);
    assert_eq!(report.stats.queued(), 0);
    assert_eq!(report.recycled, 0);
    assert_eq!(report.cancelled, 0);
}

#[tokio::test]
async fn test_exhausted_bucket_waits_for_reset() {
    let response = r#"{"headers": {"x-ratelimit-bucket": "slow", "x-ratelimit-limit": "1",
                                   "x-ratelimit-remaining": "0", "x-ratelimit-reset-after": "1"}}"#;
    let json = format!(
        r#"{{"requests": [
            {{"method": "GET", "route": [{{"literal": "guilds"}}, {{"id": 9}}], "response": {response}}},
            {{"method": "GET", "route": [{{"literal": "guilds"}}, {{"id": 9}}], "response": {response}}}
        ]}}"#
    );
    let report = replay(&json).await;

    assert_eq!(order(&report), vec![(0, "null", 0), (1, "slow", 1000)]);
}

#[tokio::test]
async fn test_unlimited_route_goes_to_miss() {
    let report = replay(
        r#"{"requests": [
            {"method": "GET", "route": [{"literal": "gateway"}], "response": {"latency": "5ms"}},
            {"method": "GET", "route": [{"literal": "gateway"}], "response": {"latency": "5ms"}}
        ]}"#,
    )
    .await;

    assert_eq!(order(&report), vec![(0, "null", 0), (1, "miss", 5)]);
    assert_eq!(report.stats.buckets.len(), 2);
    assert_eq!(report.stats.routes, 3);
}

#[tokio::test]
async fn test_global_lock_holds_other_routes() {
    let report = replay(
        r#"{"requests": [
            {"method": "GET", "route": [{"literal": "users"}, {"literal": "@me"}],
             "response": {"headers": {"x-ratelimit-bucket": "me", "x-ratelimit-remaining": "5",
                                      "x-ratelimit-reset-after": "0.5", "x-ratelimit-global": "true"}}},
            {"method": "GET", "route": [{"literal": "gateway"}], "at": "100ms"}
        ]}"#,
    )
    .await;

    assert_eq!(order(&report), vec![(0, "null", 0), (1, "null", 500)]);
    assert_eq!(report.stats.global_wait_ms, START + 500);
}

#[tokio::test]
async fn test_high_priority_jumps_queue() {
    let report = replay(
        r#"{"requests": [
            {"method": "GET", "route": [{"literal": "gateway"}]},
            {"method": "GET", "route": [{"literal": "gateway"}], "high_priority": true}
        ]}"#,
    )
    .await;

    let ids: Vec<u64> = report.dispatched.iter().map(|d| d.request.0).collect();
    assert_eq!(ids, vec![1, 0]);
}

#[tokio::test]
async fn test_query_is_part_of_dispatched_path() {
    let report = replay(
        r#"{"requests": [
            {"method": "GET", "route": [{"literal": "channels"}, {"id": 3}, {"literal": "messages"}],
             "query": [["limit", "50"], ["before", "12345"]]}
        ]}"#,
    )
    .await;

    assert_eq!(
        report.dispatched[0].path,
        "/channels/3/messages?limit=50&before=12345"
    );
}

#[test]
fn test_replay_blocking() {
    let script = Script::from_json_str(
        r#"{"requests": [{"method": "DELETE", "route": [{"literal": "channels"}, {"id": 1}]}]}"#,
    )
    .unwrap();
    let report = tokio_test::block_on(Replay::virtual_time(RatelimitConfig::default(), 0).run(script))
        .unwrap();
    assert_eq!(report.dispatched.len(), 1);
}

#[test]
fn test_reconciliation_keeps_order_across_routes() {
    let clock = ManualClock::new(START);
    let mut ratelimiter: Ratelimiter<Request> =
        Ratelimiter::new(RatelimitConfig::default(), Arc::new(clock));

    // interleave three channels while every bucket is unknown
    let channels = [1, 2, 1, 3, 1, 2];
    for (id, channel) in channels.iter().enumerate() {
        let request = new_request(&ratelimiter, id as u64, message_route(*channel));
        let bucket = ratelimiter.get(request.route_key().as_str());
        ratelimiter.add_request(bucket, request, false);
    }
    assert_eq!(ratelimiter.null().pending_len(), 6);

    let key_one = ratelimiter.key_for(&message_route(1));
    let one = ratelimiter.build(
        BucketId::NULL,
        &key_one,
        &headers(&[("x-ratelimit-bucket", "one"), ("x-ratelimit-limit", "5")]),
    );

    let in_one: Vec<u64> = ratelimiter.bucket(one).pending().map(|r| r.id().0).collect();
    let in_null: Vec<u64> = ratelimiter.null().pending().map(|r| r.id().0).collect();
    assert_eq!(in_one, vec![0, 2, 4]);
    assert_eq!(in_null, vec![1, 3, 5]);

    // later requests for a known route skip null entirely
    let request = new_request(&ratelimiter, 6, message_route(1));
    let bucket = ratelimiter.get(request.route_key().as_str());
    assert_eq!(bucket, one);
}

#[test]
fn test_timeout_wake_makes_bucket_dispatchable() {
    let clock = ManualClock::new(START);
    let mut ratelimiter: Ratelimiter<Request> =
        Ratelimiter::new(RatelimitConfig::default(), Arc::new(clock.clone()));
    let mut timers = TimerQueue::new(Arc::new(clock.clone()));

    let key = ratelimiter.key_for(&message_route(5));
    let id = ratelimiter.build(
        BucketId::NULL,
        &key,
        &headers(&[
            ("x-ratelimit-bucket", "five"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset-after", "2.5"),
        ]),
    );
    assert_eq!(ratelimiter.get_timeout(id), START + 2500);

    ratelimiter.try_timeout(id, &mut timers);
    assert!(ratelimiter.bucket(id).is_busy());

    clock.advance(Duration::from_millis(2499));
    assert!(timers.pop_due().is_empty());

    clock.advance(Duration::from_millis(1));
    let events = timers.pop_due();
    assert_eq!(events.len(), 1);
    for event in events {
        ratelimiter.fire(event);
    }

    assert!(!ratelimiter.bucket(id).is_busy());
    assert_eq!(ratelimiter.bucket(id).remaining(), 1);
    assert_eq!(ratelimiter.get_timeout(id), 0);
}

#[test]
fn test_teardown_hands_back_every_request() {
    let clock = ManualClock::new(START);
    let mut ratelimiter: Ratelimiter<Request> =
        Ratelimiter::new(RatelimitConfig::default(), Arc::new(clock));

    let key = ratelimiter.key_for(&message_route(1));
    let real = ratelimiter.resolve_or_create(&key, &headers(&[("x-ratelimit-bucket", "b1")]));

    for id in 0..4 {
        let request = new_request(&ratelimiter, id, message_route(1));
        ratelimiter.add_request(real, request, false);
    }
    for id in 4..6 {
        let request = new_request(&ratelimiter, id, message_route(2));
        ratelimiter.add_request(BucketId::NULL, request, false);
    }

    let a = ratelimiter.start_request(real).unwrap();
    let b = ratelimiter.start_request(BucketId::NULL).unwrap();

    let mut recycling = RecyclingQueue::new();
    ratelimiter.cleanup(&mut recycling);

    let mut cancelled = recycling.cancelled.clone();
    cancelled.sort();
    assert_eq!(cancelled, vec![a.id(), b.id()]);

    let mut recycled: Vec<u64> = recycling.recycled.iter().map(|r| r.id().0).collect();
    recycled.sort_unstable();
    assert_eq!(recycled, vec![1, 2, 3, 5]);
}
