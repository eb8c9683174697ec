//! Informer delivery against live upstream stand-ins.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::Method;
use axum::routing::any;
use axum::Router;

use checker_core::check::CheckDescriptor;
use checker_core::config::{HttpCheck, Upstream};
use checker_core::informer::Informer;

type Seen = Arc<Mutex<Vec<(String, String, String)>>>;

async fn capture_upstream() -> (String, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));

    async fn capture(
        State(seen): State<Seen>,
        method: Method,
        uri: axum::http::Uri,
        body: Bytes,
    ) -> &'static str {
        seen.lock().unwrap().push((
            method.to_string(),
            uri.path().to_string(),
            String::from_utf8_lossy(&body).to_string(),
        ));
        "ok"
    }

    let app = Router::new()
        .route("/*path", any(capture))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), seen)
}

fn descriptor() -> CheckDescriptor {
    CheckDescriptor::new(
        "http",
        "test",
        &HttpCheck {
            url: "http://example.com/ok".to_string(),
            ..HttpCheck::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_create_or_update_posts_config() {
    let (url, seen) = capture_upstream().await;
    let informer = Informer::new(vec![Upstream {
        url,
        ..Upstream::default()
    }])
    .unwrap();

    informer.create_or_update(&descriptor()).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (method, path, body) = &seen[0];
    assert_eq!(method, "POST");
    assert_eq!(path, "/checks/http/test");
    let value: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(value["url"], "http://example.com/ok");
}

#[tokio::test]
async fn test_replace_deletes_then_creates() {
    let (url, seen) = capture_upstream().await;
    let informer = Informer::new(vec![Upstream {
        url,
        ..Upstream::default()
    }])
    .unwrap();

    informer.replace(&descriptor()).await.unwrap();

    let seen = seen.lock().unwrap();
    let calls: Vec<(&str, &str)> = seen
        .iter()
        .map(|(m, p, _)| (m.as_str(), p.as_str()))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("DELETE", "/checks/http/test"),
            ("POST", "/checks/http/test")
        ]
    );
}

#[tokio::test]
async fn test_delete_by_name() {
    let (url, seen) = capture_upstream().await;
    let informer = Informer::new(vec![Upstream {
        url,
        ..Upstream::default()
    }])
    .unwrap();

    informer.delete_by_name("test-http").await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].0, "DELETE");
    assert_eq!(seen[0].1, "/checks/test-http");
}

#[tokio::test]
async fn test_dead_upstream_does_not_abort_walk() {
    let (live_url, seen) = capture_upstream().await;
    let informer = Informer::new(vec![
        Upstream {
            // Reserved discard port; nothing listens here.
            url: "http://127.0.0.1:9".to_string(),
            ..Upstream::default()
        },
        Upstream {
            url: live_url,
            ..Upstream::default()
        },
    ])
    .unwrap();

    // The dead upstream error is reported, but the live one was informed.
    let result = informer.create_or_update(&descriptor()).await;
    assert!(result.is_err());
    assert_eq!(seen.lock().unwrap().len(), 1);
}
