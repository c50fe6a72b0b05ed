//! End-to-end scenarios through the engine facade
//!
//! Each test drives code the way an application would: through the adapters
//! installed in the transport slots or through the HTTP client seam, then
//! inspects the ledger and the polling assertions.

use std::time::Duration;

use netstub_harness::{
    AbortController, AssertionError, ClientError, Engine, EngineConfig, FetchRequest, HttpMethod,
    Outcome, Request, TransportKind,
};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn installed_engine() -> Engine {
    let engine = Engine::new(EngineConfig::instant());
    engine.install();
    engine
}

async fn fetch_json(engine: &Engine, url: &str) -> Value {
    let response = assert_ok!(
        engine
            .promise_transport()
            .fetch(FetchRequest::new(url))
            .await
    );
    assert_ok!(response.json::<Value>())
}

// ----------------------------------------------------------------------------
// Core Scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_one_shot_route_then_neutral_response() {
    let engine = installed_engine();
    engine.on_get("/api/users", json!({ "ok": 1 }));

    assert_eq!(fetch_json(&engine, "/api/users").await, json!({ "ok": 1 }));
    assert_eq!(fetch_json(&engine, "/api/users").await, json!({ "data": {} }));

    let calls = engine.get_calls(Some(HttpMethod::Get), Some("/api/users"));
    assert_eq!(calls.len(), 1);
    assert!(calls[0].matched);
    assert!(engine.state().tracker().is_idle());
}

#[tokio::test]
async fn test_hanging_route_aborted_by_signal() {
    let engine = installed_engine();
    engine.on_get_hang("/x");

    let controller = AbortController::new();
    let future = engine
        .promise_transport()
        .fetch(FetchRequest::new("/x").signal(controller.signal()));
    assert_eq!(engine.state().tracker().active_count(), 1);

    assert!(controller.abort());
    let err = assert_err!(future.await);
    assert!(err.is_abort());

    let aborts = engine.get_aborted_calls();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].path, "/x");
    assert_eq!(aborts[0].method, HttpMethod::Get);
    assert_ok!(engine.expect_aborted_times(HttpMethod::Get, "/x", 1).await);
    assert_ok!(engine.expect_no_pending().await);
}

#[tokio::test]
async fn test_server_error_through_client_then_neutral() {
    let engine = installed_engine();
    engine.chaos().server_error("/y");
    let client = engine.client();

    let err = assert_err!(client.get("/y").await);
    assert_eq!(err.request_status(), 500);
    assert_eq!(err.response_data().unwrap()["message"], "Server error");
    assert_eq!(err.to_string(), "Request failed with status code 500");

    let second = assert_ok!(client.get("/y").await);
    assert_eq!(second.status, 200);
    assert_eq!(second.data, json!({ "data": {} }));

    let calls = engine.get_calls(Some(HttpMethod::Get), Some("y"));
    assert_eq!(calls.len(), 2);
    assert!(calls[0].matched);
    assert!(!calls[1].matched);
}

#[tokio::test]
async fn test_unused_route_fails_teardown() {
    let engine = installed_engine();
    engine.on_get("/never", json!([]));

    match engine.expect_no_pending().await {
        Err(AssertionError::PendingMocks { routes }) => assert_eq!(routes, vec!["GET /never"]),
        other => panic!("expected pending mocks, got {:?}", other),
    }
}

#[tokio::test]
async fn test_expect_called_times_within_reports_path() {
    let engine = installed_engine();

    let err = assert_err!(
        engine
            .expect_called_times_within(HttpMethod::Get, "/z", 1, Duration::from_millis(50))
            .await
    );
    let message = err.to_string();
    assert!(message.contains("/z"), "message was {}", message);
    assert!(message.contains("50"), "message was {}", message);
}

// ----------------------------------------------------------------------------
// Matching
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_newest_registration_answers_first() {
    let engine = installed_engine();
    engine.on_get("/p", json!("older"));
    engine.on_get("/p", json!("newer"));

    assert_eq!(fetch_json(&engine, "/p").await, json!("newer"));
    assert_eq!(fetch_json(&engine, "/p").await, json!("older"));
    assert_ok!(engine.expect_no_pending().await);
}

#[tokio::test]
async fn test_query_pattern_matches_case_insensitive_keys() {
    let engine = installed_engine();
    engine.on_get("/search?q=one", json!({ "hits": 1 }));

    assert_eq!(
        fetch_json(&engine, "/search?q=two").await,
        json!({ "data": {} })
    );
    assert_eq!(
        fetch_json(&engine, "/search?Q=one&extra=9").await,
        json!({ "hits": 1 })
    );

    let calls = engine.get_calls(Some(HttpMethod::Get), Some("/search"));
    assert_eq!(calls.len(), 1);
    let query = calls[0].query.as_ref().unwrap();
    assert_eq!(query.get("Q"), Some("one"));
    assert_eq!(query.get("extra"), Some("9"));
}

#[tokio::test]
async fn test_mounted_path_and_method_filtering() {
    let engine = installed_engine();
    engine.on_post("/items", json!({ "id": 7 }));

    assert_eq!(
        fetch_json(&engine, "http://localhost/app/items").await,
        json!({ "data": {} })
    );

    let response = assert_ok!(
        engine
            .promise_transport()
            .fetch(
                FetchRequest::new("http://localhost/app/items")
                    .method(HttpMethod::Post)
                    .json(json!({ "name": "a" })),
            )
            .await
    );
    assert_eq!(assert_ok!(response.json::<Value>()), json!({ "id": 7 }));

    let posts = engine.get_calls(Some(HttpMethod::Post), Some("/items"));
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].mount, "/app");
    assert_eq!(posts[0].body, Some(json!({ "name": "a" })));

    let gets = engine.get_calls(Some(HttpMethod::Get), None);
    assert_eq!(gets.len(), 1);
    assert_eq!(gets[0].path, "/app/items");
}

#[tokio::test]
async fn test_multi_use_route() {
    let engine = installed_engine();
    engine
        .route(HttpMethod::Get, "/poll")
        .times(3)
        .reply(json!({ "tick": true }));

    for _ in 0..3 {
        assert_eq!(fetch_json(&engine, "/poll").await, json!({ "tick": true }));
    }
    assert_eq!(fetch_json(&engine, "/poll").await, json!({ "data": {} }));
    assert_ok!(engine.expect_called_times(HttpMethod::Get, "/poll", 3).await);
}

// ----------------------------------------------------------------------------
// Faults And Timing
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_network_error_through_client() {
    let engine = installed_engine();
    engine.chaos().network_error("/down");

    let err = assert_err!(engine.client().get("/down").await);
    assert_eq!(err.request_status(), 0);
    assert!(matches!(err, ClientError::Network { .. }));
    assert!(engine.state().tracker().is_idle());
}

#[tokio::test]
async fn test_rate_limit_and_timeout_statuses() {
    let engine = installed_engine();
    engine.chaos().rate_limit("/busy");
    engine.chaos().timeout("/slow");

    let busy = assert_ok!(
        engine
            .promise_transport()
            .fetch(FetchRequest::new("/busy"))
            .await
    );
    assert_eq!(busy.status, 429);
    assert!(!busy.ok());

    let err = assert_err!(engine.client().get("/slow").await);
    assert_eq!(err.request_status(), 408);
}

#[tokio::test]
async fn test_slow_network_delays_matched_responses() {
    let engine = Engine::new(EngineConfig::slow_network(60));
    engine.install();
    engine.on_get("/slow", json!(1));

    let started = std::time::Instant::now();
    let response = assert_ok!(
        engine
            .promise_transport()
            .fetch(FetchRequest::new("/slow"))
            .await
    );
    assert_eq!(response.status, 200);
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn test_deferred_body_settles_when_resolved() {
    let engine = installed_engine();
    let (deferred, resolver) = netstub_harness::Deferred::channel();
    engine.route(HttpMethod::Get, "/later").reply_deferred(deferred);

    let future = engine
        .promise_transport()
        .fetch(FetchRequest::new("/later"));
    assert!(!engine.state().tracker().is_idle());

    let waiter = engine.clone();
    let idle = tokio::spawn(async move { waiter.wait_for_idle().await });

    assert!(resolver.resolve(json!({ "done": true })));
    let response = assert_ok!(future.await);
    assert_eq!(assert_ok!(response.json::<Value>()), json!({ "done": true }));
    assert_ok!(idle.await);
}

// ----------------------------------------------------------------------------
// Installation
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_slots_route_through_engine_until_uninstalled() {
    let engine = Engine::new(EngineConfig::instant());
    let slots = engine.slots().clone();
    assert!(slots.get(TransportKind::Promise).is_err());

    engine.install();
    engine.on_get("/via-slot", json!("mocked"));
    let outcome = assert_ok!(slots.dispatch(TransportKind::Promise, Request::get("/via-slot"))).await;
    match outcome {
        Outcome::Success(response) => assert_eq!(response.body, "\"mocked\""),
        other => panic!("unexpected outcome {:?}", other),
    }

    assert!(engine.uninstall());
    assert!(!engine.is_installed());
    assert!(slots.get(TransportKind::Promise).is_err());
    assert!(slots.get(TransportKind::Callback).is_err());
}

#[tokio::test]
async fn test_reinstall_clears_previous_test_state() {
    let engine = installed_engine();
    engine.on_get("/first", json!(1));
    fetch_json(&engine, "/first").await;
    engine.on_get("/leftover", json!(2));

    engine.install();
    assert!(engine.routes().is_empty());
    assert!(engine.get_calls(None, None).is_empty());
    assert_ok!(engine.expect_no_pending().await);
}
