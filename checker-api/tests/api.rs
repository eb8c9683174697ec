use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use checker_api::config::AuthConfig;
use checker_api::routes::{router, AppState};
use checker_core::{CheckersConfig, Runner, Status};

async fn new_runner() -> Arc<Runner> {
    Runner::new_from_config(&CheckersConfig::default(), false)
        .await
        .unwrap()
}

fn request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let state = AppState::new(new_runner().await);
    let app = router(state, &AuthConfig::default());

    let response = app
        .oneshot(request("GET", "/healthz", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "OK");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let state = AppState::new(new_runner().await);
    let app = router(state, &AuthConfig::default());

    let response = app
        .oneshot(request("GET", "/metrics", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn test_add_and_delete_check() {
    let runner = new_runner().await;
    let state = AppState::new(runner.clone());
    let app = router(state, &AuthConfig::default());

    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/checks/http/test",
            r#"{"url": "http://127.0.0.1:9/nope", "interval": "1h", "initialDelay": "1h"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(runner.check_keys().await, vec!["test-http"]);
    assert_eq!(runner.scheduled_keys().await, vec!["test-http"]);

    // PUT replaces the same key.
    let response = app
        .clone()
        .oneshot(request(
            "PUT",
            "/checks/http/test",
            r#"url: http://127.0.0.1:9/other
interval: 1h
initialDelay: 1h
"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(runner.check_keys().await, vec!["test-http"]);

    let response = app
        .clone()
        .oneshot(request("DELETE", "/checks/http/test", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(runner.check_keys().await.is_empty());

    runner.stop().await;
}

#[tokio::test]
async fn test_delete_by_composite_name() {
    let runner = new_runner().await;
    let state = AppState::new(runner.clone());
    let app = router(state, &AuthConfig::default());

    app.clone()
        .oneshot(request(
            "POST",
            "/checks/dns/test",
            r#"{"host": "localhost", "interval": "1h", "initialDelay": "1h"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(runner.check_keys().await, vec!["test-dns"]);

    let response = app
        .oneshot(request("DELETE", "/checks/test-dns", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(runner.check_keys().await.is_empty());

    runner.stop().await;
}

#[tokio::test]
async fn test_rejects_bad_bodies() {
    let state = AppState::new(new_runner().await);
    let app = router(state, &AuthConfig::default());

    // Unknown check type.
    let response = app
        .clone()
        .oneshot(request("POST", "/checks/nope/test", r#"{"url": "x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Config that fails validation (missing URL).
    let response = app
        .clone()
        .oneshot(request("POST", "/checks/http/test", r#"{"method": "GET"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unparsable body.
    let response = app
        .oneshot(request("POST", "/checks/http/test", "{nope: ["))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_codes_follow_policy() {
    let runner = new_runner().await;
    let mut state = AppState::new(runner.clone());
    state.fail_status = StatusCode::from_u16(512).unwrap();
    state.degraded_status = StatusCode::from_u16(299).unwrap();
    let app = router(state, &AuthConfig::default());

    // Empty map evaluates as all-failed under the default-true fold.
    let response = app.clone().oneshot(request("GET", "/", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::from_u16(512).unwrap());

    runner
        .update_status_for(
            "good-http",
            Status {
                ok: true,
                ..Status::default()
            },
        )
        .await;
    let response = app.clone().oneshot(request("GET", "/", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    runner
        .update_status_for(
            "bad-http",
            Status {
                ok: false,
                error: "down".to_string(),
                contiguous_failures: 1,
                ..Status::default()
            },
        )
        .await;
    let response = app.clone().oneshot(request("GET", "/", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::from_u16(299).unwrap());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let statuses: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(statuses["bad-http"]["contiguousFailures"], 1);
    assert_eq!(statuses["good-http"]["ok"], true);
}

#[tokio::test]
async fn test_basic_auth() {
    let state = AppState::new(new_runner().await);
    let auth = AuthConfig {
        user: "user".to_string(),
        pass: "pass".to_string(),
    };
    let app = router(state, &auth);

    // Health stays open.
    let response = app
        .clone()
        .oneshot(request("GET", "/healthz", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The status route requires credentials.
    let response = app.clone().oneshot(request("GET", "/", "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let authorized = Request::builder()
        .method("GET")
        .uri("/")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(authorized).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
