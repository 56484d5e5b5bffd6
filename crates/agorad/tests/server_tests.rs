//! HTTP API tests.
//!
//! Requests go straight into the router with `oneshot`, no socket involved.

use agora_shared::rpc::{ErrorBody, EvalResponse, HealthResponse, SessionView, TurnResponse};
use agora_shared::{SessionState, VERSION};
use agorad::config::Config;
use agorad::fixtures::offline_pipeline;
use agorad::server::router;
use agorad::AppState;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let config = Arc::new(Config::default());
    router(Arc::new(AppState::new(offline_pipeline(&config), config)))
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

/// Test that health reports version and zero sessions at start
#[tokio::test]
async fn test_health() {
    let app = app();

    let (status, body) = send(&app, request(Method::GET, "/v1/health")).await;
    let health: HealthResponse = parse(&body);

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health.version, VERSION);
    assert_eq!(health.active_sessions, 0);
}

/// Test that a turn round-trips and shows up in the session view
#[tokio::test]
async fn test_turn_then_view() {
    let app = app();

    let (status, body) = send(
        &app,
        post(
            "/v1/turn",
            json!({"session_id": "web-1", "text": "What's the weather like today?"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reply: TurnResponse = parse(&body);
    assert_eq!(reply.session_id, "web-1");
    assert_eq!(reply.turn.final_state(), Some(SessionState::BoundaryResponding));

    let (status, body) = send(&app, request(Method::GET, "/v1/sessions/web-1")).await;
    assert_eq!(status, StatusCode::OK);
    let view: SessionView = parse(&body);
    assert_eq!(view.turns.len(), 2);
    assert_eq!(view.state, SessionState::AwaitingTurn);
}

/// Test that blank text is rejected before reaching the pipeline
#[tokio::test]
async fn test_empty_text_rejected() {
    let app = app();

    let (status, body) = send(
        &app,
        post("/v1/turn", json!({"session_id": "web-1", "text": "   "})),
    )
    .await;
    let error: ErrorBody = parse(&body);

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "bad_request");
}

/// Test that an unknown session is a 404
#[tokio::test]
async fn test_unknown_session_not_found() {
    let app = app();

    let (status, _) = send(&app, request(Method::GET, "/v1/sessions/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request(Method::DELETE, "/v1/sessions/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test that turns on an ended session are refused with a conflict
#[tokio::test]
async fn test_ended_session_conflict() {
    let app = app();
    let turn = || {
        post(
            "/v1/turn",
            json!({"session_id": "web-2", "text": "Can you help me with my homework?"}),
        )
    };

    let (status, _) = send(&app, turn()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, request(Method::DELETE, "/v1/sessions/web-2")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, turn()).await;
    let error: ErrorBody = parse(&body);
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error.code, "session_ended");
}

/// Test that an offline evaluation of one scenario passes
#[tokio::test]
async fn test_offline_eval() {
    let app = app();

    let (status, body) = send(
        &app,
        post(
            "/v1/eval",
            json!({"offline": true, "scenarios": ["weather_then_homework"]}),
        ),
    )
    .await;
    let response: EvalResponse = parse(&body);

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.reports.len(), 1);
    assert_eq!(response.total_failed(), 0);
}

/// Test that an unknown scenario id is rejected
#[tokio::test]
async fn test_unknown_scenario_rejected() {
    let app = app();

    let (status, body) = send(
        &app,
        post("/v1/eval", json!({"offline": true, "scenarios": ["nope"]})),
    )
    .await;
    let error: ErrorBody = parse(&body);

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error.code, "unknown_scenario");
}
