//! Replication of check configuration to upstream peers.
//!
//! Every mutation of the local check set is pushed to all configured
//! upstreams. Delivery is best effort with retries; a periodic refresher in
//! the runner re-pushes everything so upstreams converge even when
//! individual deliveries are missed.

use std::time::Duration;

use reqwest::Method;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::check::CheckDescriptor;
use crate::config::Upstream;
use crate::error::{Error, Result};

const MAX_ATTEMPTS: u32 = 4;
const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 5_000;

/// Client that syncs check configuration to upstream synthetic-checkers.
pub struct Informer {
    upstreams: RwLock<Vec<Upstream>>,
    client: reqwest::Client,
}

impl Informer {
    pub fn new(upstreams: Vec<Upstream>) -> Result<Self> {
        if upstreams.iter().any(|u| u.url.is_empty()) {
            return Err(Error::Configuration("invalid configuration".into()));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            upstreams: RwLock::new(upstreams),
            client,
        })
    }

    /// Add an upstream; a URL that is already registered is ignored.
    pub async fn add_upstream(&self, upstream: Upstream) {
        let mut upstreams = self.upstreams.write().await;
        if upstreams.iter().any(|u| u.url == upstream.url) {
            return;
        }
        upstreams.push(upstream);
    }

    /// Remove the upstream with the given URL, if present.
    pub async fn remove_upstream(&self, url: &str) {
        let mut upstreams = self.upstreams.write().await;
        upstreams.retain(|u| u.url != url);
    }

    pub async fn upstream_count(&self) -> usize {
        self.upstreams.read().await.len()
    }

    /// Push the given check configuration to all upstreams.
    pub async fn create_or_update(&self, check: &CheckDescriptor) -> Result<()> {
        let endpoint = format!("checks/{}/{}", check.kind, check.name);
        self.inform_upstreams(Method::POST, &endpoint, Some(check.config.to_string()))
            .await
    }

    /// Delete the given check from all upstreams.
    pub async fn delete(&self, check: &CheckDescriptor) -> Result<()> {
        let endpoint = format!("checks/{}/{}", check.kind, check.name);
        self.inform_upstreams(Method::DELETE, &endpoint, None).await
    }

    /// Delete a check by its composite name from all upstreams.
    pub async fn delete_by_name(&self, name: &str) -> Result<()> {
        self.inform_upstreams(Method::DELETE, &format!("checks/{name}"), None)
            .await
    }

    /// Replace (delete then create) the given check on all upstreams.
    pub async fn replace(&self, check: &CheckDescriptor) -> Result<()> {
        let deleted = self.delete(check).await;
        let updated = self.create_or_update(check).await;
        match (deleted, updated) {
            (Ok(()), Ok(())) => Ok(()),
            (d, u) => Err(Error::Internal(format!(
                "delete err: {:?}; update err: {:?}",
                d.err(),
                u.err()
            ))),
        }
    }

    /// Walk every upstream; per-upstream failures are logged and aggregated
    /// but never abort the walk.
    async fn inform_upstreams(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<String>,
    ) -> Result<()> {
        let upstreams = self.upstreams.read().await.clone();

        let mut errs: Vec<String> = Vec::new();
        for upstream in &upstreams {
            let url = format!("{}/{endpoint}", upstream.url.trim_end_matches('/'));
            match self.inform(upstream, method.clone(), &url, body.as_deref()).await {
                Ok(()) => debug!(url = %url, method = %method, "informed upstream"),
                Err(e) => {
                    warn!(url = %url, method = %method, error = %e, "failed to inform upstream");
                    errs.push(format!("{url}: {e}"));
                }
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(Error::Internal(errs.join("; ")))
        }
    }

    /// Issue one request with exponential-backoff retries on transport
    /// errors and server-side (5xx) failures.
    async fn inform(
        &self,
        upstream: &Upstream,
        method: Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut request = self.client.request(method.clone(), url);
            if let Some(timeout) = upstream.timeout {
                request = request.timeout(timeout);
            }
            for (header, value) in &upstream.headers {
                request = request.header(header, value);
            }
            if let Some(body) = body {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.to_string());
            }

            let outcome = match request.send().await {
                Ok(response) if response.status().is_server_error() => {
                    Err(format!("server error: {}", response.status()))
                }
                Ok(response) if !response.status().is_success() => {
                    // Client errors will not improve with retries.
                    return Err(Error::Internal(format!(
                        "unexpected status: {}",
                        response.status()
                    )));
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(message) if attempt >= MAX_ATTEMPTS => {
                    return Err(Error::Internal(message));
                }
                Err(_) => tokio::time::sleep(retry_delay(attempt)).await,
            }
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let delay_ms = (BASE_DELAY_MS * 2_u64.pow(attempt.saturating_sub(1))).min(MAX_DELAY_MS);
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(url: &str) -> Upstream {
        Upstream {
            url: url.to_string(),
            ..Upstream::default()
        }
    }

    #[test]
    fn test_rejects_empty_url() {
        assert!(Informer::new(vec![upstream("")]).is_err());
        assert!(Informer::new(vec![upstream("http://peer:8080")]).is_ok());
    }

    #[tokio::test]
    async fn test_add_upstream_is_idempotent() {
        let informer = Informer::new(Vec::new()).unwrap();
        informer.add_upstream(upstream("http://peer:8080")).await;
        informer.add_upstream(upstream("http://peer:8080")).await;
        assert_eq!(informer.upstream_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_then_add_upstream() {
        let informer = Informer::new(vec![upstream("http://peer:8080")]).unwrap();
        informer.remove_upstream("http://peer:8080").await;
        informer.remove_upstream("http://peer:8080").await;
        assert_eq!(informer.upstream_count().await, 0);
        informer.add_upstream(upstream("http://peer:8080")).await;
        assert_eq!(informer.upstream_count().await, 1);
    }

    #[test]
    fn test_retry_delay_caps() {
        assert_eq!(retry_delay(1), Duration::from_millis(100));
        assert_eq!(retry_delay(2), Duration::from_millis(200));
        assert_eq!(retry_delay(3), Duration::from_millis(400));
        assert_eq!(retry_delay(10), Duration::from_millis(5_000));
    }
}
