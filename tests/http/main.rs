//! Breaker-protected HTTP client against a local axum server.
#![cfg(feature = "http")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use contest_clock::breaker::{BreakerConfig, CircuitState};
use contest_clock::http::{ServiceClient, ServiceResponse, DEFAULT_FALLBACK_MESSAGE};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Hits(Arc<AtomicUsize>);

impl Hits {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn router(hits: Hits) -> Router {
    Router::new()
        .route(
            "/targets",
            get(|State(hits): State<Hits>, headers: HeaderMap| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({ "targets": [1, 2], "auth": auth }))
            }),
        )
        .route(
            "/scores",
            post(|State(hits): State<Hits>, Json(body): Json<Value>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "received": body }))
            }),
        )
        .route(
            "/broken",
            get(|State(hits): State<Hits>| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                StatusCode::INTERNAL_SERVER_ERROR
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({ "late": true }))
            }),
        )
        .with_state(hits)
}

fn config() -> BreakerConfig {
    BreakerConfig::default()
        .with_call_timeout(Duration::from_millis(300))
        .with_minimum_requests(4)
        .with_error_threshold_percent(50)
        .with_open_duration(Duration::from_millis(200))
}

#[tokio::test]
async fn live_get_sends_bearer_token() {
    let base = serve(router(Hits::default())).await;
    let client = ServiceClient::new(base, config()).with_bearer_token("secret");

    let response = client.get("targets").await;

    assert!(!response.is_fallback());
    assert_eq!(response.value()["targets"], json!([1, 2]));
    assert_eq!(response.value()["auth"], "Bearer secret");
}

#[tokio::test]
async fn post_forwards_json_body() {
    let base = serve(router(Hits::default())).await;
    let client = ServiceClient::new(format!("{base}/"), config());

    let response = client.post("/scores", &json!({ "score": 87 })).await;

    assert_eq!(
        response,
        ServiceResponse::Live(json!({ "received": { "score": 87 } }))
    );
}

#[tokio::test]
async fn server_errors_trip_the_breaker_and_stop_traffic() {
    let hits = Hits::default();
    let base = serve(router(hits.clone())).await;
    let client = ServiceClient::new(base, config());

    for _ in 0..4 {
        assert!(client.get("broken").await.is_fallback());
    }
    assert_eq!(client.state(), CircuitState::Open);

    let rejected = client.get("targets").await;
    assert_eq!(
        rejected,
        ServiceResponse::Fallback(json!({ "message": DEFAULT_FALLBACK_MESSAGE }))
    );
    assert_eq!(hits.get(), 4);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!client.get("targets").await.is_fallback());
    assert_eq!(client.state(), CircuitState::Closed);
}

#[tokio::test]
async fn slow_response_yields_custom_fallback() {
    let base = serve(router(Hits::default())).await;
    let client = ServiceClient::new(base, config()).with_fallback(json!("try later"));

    let response = client.get("slow").await;

    assert_eq!(response, ServiceResponse::Fallback(json!("try later")));
    assert_eq!(client.breaker().snapshot().failure_count, 1);
}

#[tokio::test]
async fn unreachable_service_falls_back() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ServiceClient::new(format!("http://{addr}"), config());
    assert!(client.delete("targets/1").await.is_fallback());
}
