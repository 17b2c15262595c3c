// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Route tests driving the router in-process over the mock transport.

use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use courier_core::types::{DisconnectReason, SessionStatus};
use courier_gateway::{GatewayState, router};
use courier_test_utils::{OpenBehavior, TestHarness};

fn app(h: &TestHarness) -> Router {
    router(GatewayState {
        courier: h.courier.clone(),
    })
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if body.is_some() {
        request = request.header(header::CONTENT_TYPE, "application/json");
    }
    let request = request
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, "POST", uri, Some(&body.to_string())).await
}

#[tokio::test]
async fn connect_returns_qr_and_status_reflects_it() {
    let h = TestHarness::builder()
        .with_behavior(OpenBehavior::Qr("2@ref".into()))
        .build()
        .await
        .unwrap();
    let app = app(&h);

    let (status, body) = post(&app, "/connect", json!({"accountId": "acct-1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"qrCode": "2@ref"}));

    let (status, body) = call(&app, "GET", "/status/acct-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "qrPending");
    assert_eq!(body["accountId"], "acct-1");

    let (status, body) = call(&app, "GET", "/status/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nobody"));

    let (status, body) = call(&app, "GET", "/instances", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instances"].as_array().unwrap().len(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn disconnect_and_restart_round_trip() {
    let h = TestHarness::builder().build().await.unwrap();
    let app = app(&h);
    h.connect("acct-1").await.unwrap();

    let (status, body) = post(&app, "/restart", json!({"accountId": "acct-1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("status").is_some() || body.get("qrCode").is_some());

    let (status, body) = post(&app, "/disconnect", json!({"accountId": "acct-1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    let (status, _) = post(&app, "/disconnect", json!({"accountId": "ghost"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    h.shutdown().await;
}

#[tokio::test]
async fn send_routes_deliver_and_validate() {
    let h = TestHarness::builder().build().await.unwrap();
    let app = app(&h);
    h.connect("acct-1").await.unwrap();

    let (status, body) = post(
        &app,
        "/send/text",
        json!({"accountId": "acct-1", "to": "15550001111", "text": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["messageId"].as_str().unwrap().starts_with("MOCK"));
    assert_eq!(body["status"], "serverAck");

    let (status, _) = post(
        &app,
        "/send/media",
        json!({
            "accountId": "acct-1",
            "to": "15550001111",
            "url": "https://example.com/a.pdf",
            "mimetype": "application/pdf",
            "fileName": "a.pdf"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(
        &app,
        "/send/buttons",
        json!({
            "accountId": "acct-1",
            "to": "15550001111",
            "text": "Pick",
            "buttons": [{"id": "a", "text": "A"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(
        &app,
        "/send/text",
        json!({"accountId": "acct-1", "to": "not a number", "text": "hi"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = call(&app, "POST", "/send/text", Some("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/send/text", json!({"accountId": "acct-1"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    h.shutdown().await;
}

#[tokio::test]
async fn send_without_connection_is_bad_gateway() {
    let h = TestHarness::builder().build().await.unwrap();
    let app = app(&h);

    let (status, body) = post(
        &app,
        "/send/text",
        json!({"accountId": "acct-9", "to": "15550001111", "text": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("no active connection"));
    h.shutdown().await;
}

#[tokio::test]
async fn schedule_rejects_past_and_returns_job_id() {
    let h = TestHarness::builder().build().await.unwrap();
    let app = app(&h);

    let (status, _) = post(
        &app,
        "/schedule",
        json!({"accountId": "acct-1", "to": "1555", "text": "hi", "sendAt": "2000-01-01T00:00:00Z"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let send_at = (chrono::Utc::now() + chrono::Duration::minutes(10)).to_rfc3339();
    let (status, body) = post(
        &app,
        "/schedule",
        json!({"accountId": "acct-1", "to": "1555", "text": "hi", "sendAt": send_at}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["jobId"].as_i64().unwrap() > 0);
    h.shutdown().await;
}

#[tokio::test]
async fn queue_controls_and_health_codes() {
    let h = TestHarness::builder().build().await.unwrap();
    let app = app(&h);

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall"], "healthy");

    let (status, _) = call(&app, "POST", "/queue/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, stats) = call(&app, "GET", "/queue/stats", None).await;
    assert_eq!(stats["inbound"]["paused"], true);
    assert_eq!(stats["outbound"]["paused"], true);

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subsystems"]["queue"]["status"], "healthy");

    let (status, _) = post(&app, "/queue/resume", json!({"direction": "inbound"})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, stats) = call(&app, "GET", "/queue/stats", None).await;
    assert_eq!(stats["inbound"]["paused"], false);
    assert_eq!(stats["outbound"]["paused"], true);

    let (status, body) = call(&app, "POST", "/health/recover", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["actions"], json!([]));
    let (_, stats) = call(&app, "GET", "/queue/stats", None).await;
    assert_eq!(stats["outbound"]["paused"], true);

    // A logged-out session leaves 0/1 connected.
    let account = h.connect("acct-1").await.unwrap();
    h.connector
        .handle(&account)
        .unwrap()
        .drop_connection(DisconnectReason::LoggedOut)
        .await;
    h.wait_for_status(&account, SessionStatus::Disconnected, Duration::from_secs(2))
        .await
        .unwrap();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["overall"], "degraded");
    assert_eq!(body["subsystems"]["connections"]["status"], "degraded");

    let (status, body) = call(&app, "POST", "/queue/retry", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"retried": 0}));

    let (status, _) = post(&app, "/queue/pause", json!({"direction": "sideways"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    h.shutdown().await;
}

#[tokio::test]
async fn disposed_service_is_unavailable() {
    let h = TestHarness::builder().build().await.unwrap();
    let app = app(&h);
    h.shutdown().await;

    let (status, body) = call(&app, "GET", "/instances", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
    let (status, _) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
