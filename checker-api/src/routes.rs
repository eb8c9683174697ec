//! API routes: the status map, health and metrics endpoints, and the
//! check CRUD surface used by peers and operators.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use checker_core::{metrics, status, CheckersConfig, Runner};

use crate::config::AuthConfig;
use crate::middleware;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<Runner>,
    /// Response code when all checks are failed.
    pub fail_status: StatusCode,
    /// Response code when at least one check is failed.
    pub degraded_status: StatusCode,
    pub pretty_json: bool,
}

impl AppState {
    #[must_use]
    pub fn new(runner: Arc<Runner>) -> Self {
        Self {
            runner,
            fail_status: StatusCode::OK,
            degraded_status: StatusCode::OK,
            pretty_json: false,
        }
    }

    /// Build state from raw status codes; invalid codes fall back to 200.
    #[must_use]
    pub fn with_status_codes(
        runner: Arc<Runner>,
        fail_status: u16,
        degraded_status: u16,
        pretty_json: bool,
    ) -> Self {
        Self {
            runner,
            fail_status: StatusCode::from_u16(fail_status).unwrap_or(StatusCode::OK),
            degraded_status: StatusCode::from_u16(degraded_status).unwrap_or(StatusCode::OK),
            pretty_json,
        }
    }
}

/// Create the HTTP router with all routes.
///
/// Health and metrics stay open; everything else is behind basic auth when
/// credentials are configured.
pub fn router(state: AppState, auth: &AuthConfig) -> Router {
    let mut protected = Router::new()
        .route("/", get(get_status))
        .route(
            "/checks/:kind/:name",
            post(upsert_check).put(upsert_check).delete(delete_typed_check),
        )
        .route("/checks/:name", delete(delete_check));

    if auth.enabled() {
        let credentials = auth.clone();
        protected = protected.route_layer(axum::middleware::from_fn(
            move |request: Request, next: Next| {
                let credentials = credentials.clone();
                async move { middleware::check_basic_auth(&credentials, request, next).await }
            },
        ));
    }

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(get_metrics))
        .merge(protected)
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(TraceLayer::new_for_http())
}

/// The full status map. The response code degrades per the configured
/// policies when checks are failing.
async fn get_status(State(state): State<AppState>) -> Response {
    let statuses = state.runner.get_status().await;

    let mut code = StatusCode::OK;
    if state.fail_status != StatusCode::OK || state.degraded_status != StatusCode::OK {
        let (all_failed, any_failed) = status::evaluate(&statuses);
        if all_failed {
            code = state.fail_status;
        } else if any_failed {
            code = state.degraded_status;
        }
    }

    if state.pretty_json {
        let body = serde_json::to_string_pretty(&statuses).unwrap_or_default();
        (code, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    } else {
        (code, Json(statuses)).into_response()
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "OK"}))
}

async fn get_metrics() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
        .into_response()
}

/// Add or replace a check. The body is the check's configuration in JSON or
/// YAML; it is wrapped as `{"<kind>Checks": {"<name>": <body>}}` and loaded
/// like any other configuration, replacing the existing key first.
async fn upsert_check(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let value: serde_yaml::Value = match serde_yaml::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let cfg = match synthesize_config(&kind, &name, value) {
        Ok(cfg) => cfg,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    state.runner.del_check(&format!("{name}-{kind}")).await;
    if let Err(e) = state.runner.add_from_config(&cfg, true).await {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    StatusCode::OK.into_response()
}

async fn delete_typed_check(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> StatusCode {
    state.runner.del_check(&format!("{name}-{kind}")).await;
    StatusCode::OK
}

async fn delete_check(State(state): State<AppState>, Path(name): Path<String>) -> StatusCode {
    state.runner.del_check(&name).await;
    StatusCode::OK
}

fn synthesize_config(
    kind: &str,
    name: &str,
    body: serde_yaml::Value,
) -> Result<CheckersConfig, String> {
    let field = match kind {
        "http" => "httpChecks",
        "dns" => "dnsChecks",
        "conn" => "connChecks",
        "tls" => "tlsChecks",
        "grpc" => "grpcChecks",
        "k8s" => "k8sChecks",
        "k8sping" => "k8sPings",
        _ => return Err("unknown check type".to_string()),
    };

    let mut by_name = serde_yaml::Mapping::new();
    by_name.insert(serde_yaml::Value::String(name.to_string()), body);
    let mut root = serde_yaml::Mapping::new();
    root.insert(
        serde_yaml::Value::String(field.to_string()),
        serde_yaml::Value::Mapping(by_name),
    );

    serde_yaml::from_value(serde_yaml::Value::Mapping(root)).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesize_config() {
        let body: serde_yaml::Value =
            serde_yaml::from_str("url: http://example.com\nmethod: GET").unwrap();
        let cfg = synthesize_config("http", "test", body).unwrap();
        assert_eq!(cfg.http_checks["test"].url, "http://example.com");

        let body: serde_yaml::Value = serde_yaml::from_str("host: example.com").unwrap();
        let cfg = synthesize_config("dns", "test", body).unwrap();
        assert_eq!(cfg.dns_checks["test"].host, "example.com");

        let body = serde_yaml::Value::Null;
        assert!(synthesize_config("nope", "test", body).is_err());
    }
}
