use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, Url};

use crate::check::{Check, CheckDescriptor};
use crate::config::HttpCheck;
use crate::error::{Error, Result};

use super::tls::remaining_leaf_validity;
use super::util::human_duration;

/// HTTP check that issues the configured request and validates the response
/// status, body and (optionally) the server certificate's remaining validity.
pub struct HttpChecker {
    name: String,
    config: HttpCheck,
    url: Url,
    method: Method,
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(name: &str, mut config: HttpCheck) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Configuration("check name must not be empty".into()));
        }
        if config.url.is_empty() {
            return Err(Error::Configuration("URL must not be empty".into()));
        }
        let url =
            Url::parse(&config.url).map_err(|e| Error::Configuration(format!("invalid URL: {e}")))?;

        if config.expected_status == 0 {
            config.expected_status = 200;
        }
        if config.method.is_empty() {
            config.method = "GET".to_string();
        }
        let method = Method::from_bytes(config.method.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid method: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.base.timeout_or_default())
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            config,
            url,
            method,
            client,
        })
    }

    async fn do_request(&self) -> Result<reqwest::Response> {
        let mut request = self.client.request(self.method.clone(), self.url.clone());
        for (header, value) in &self.config.headers {
            request = request.header(header, value);
        }
        if !self.config.body.is_empty() {
            request = request.body(self.config.body.clone());
        }
        request.send().await.map_err(|e| Error::HttpRequest {
            method: self.config.method.clone(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Check for HttpChecker {
    async fn execute(&self) -> Result<()> {
        let response = self.do_request().await?;

        let got = response.status().as_u16();
        if got != self.config.expected_status {
            return Err(Error::UnexpectedStatus {
                got,
                expected: self.config.expected_status,
            });
        }

        if let Some(threshold) = self.config.cert_expiry_threshold {
            if self.url.scheme() == "https" {
                let host = self.url.host_str().unwrap_or_default();
                let port = self.url.port_or_known_default().unwrap_or(443);
                let ttl = remaining_leaf_validity(
                    &format!("{host}:{port}"),
                    self.config.base.timeout_or_default(),
                )
                .await?;
                if ttl <= threshold {
                    return Err(Error::CertExpiring(human_duration(ttl)));
                }
            }
        }

        if !self.config.expected_body.is_empty() {
            let body = response.text().await.map_err(|e| {
                Error::Internal(format!("failed to read response body: {e}"))
            })?;
            if !body.contains(&self.config.expected_body) {
                return Err(Error::UnexpectedBody {
                    got: body,
                    expected: self.config.expected_body.clone(),
                });
            }
        }

        Ok(())
    }

    fn interval(&self) -> Duration {
        self.config.base.interval_or_default()
    }

    fn initial_delay(&self) -> Duration {
        self.config.base.initial_delay_or_default()
    }

    fn describe(&self) -> Result<CheckDescriptor> {
        CheckDescriptor::new("http", &self.name, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use std::net::SocketAddr;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn check_for(url: String, config: HttpCheck) -> HttpChecker {
        HttpChecker::new("test", HttpCheck { url, ..config }).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(HttpChecker::new("", HttpCheck::default()).is_err());
        assert!(HttpChecker::new("test", HttpCheck::default()).is_err());
        let bad_url = HttpCheck {
            url: "::not-a-url::".to_string(),
            ..HttpCheck::default()
        };
        assert!(HttpChecker::new("test", bad_url).is_err());
    }

    #[test]
    fn test_defaults() {
        let check = check_for("http://fake.com/ok".to_string(), HttpCheck::default());
        assert_eq!(check.config.method, "GET");
        assert_eq!(check.config.expected_status, 200);
        assert_eq!(check.interval(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_200_ok() {
        let addr = serve(Router::new().route("/ok", get(|| async { "fine" }))).await;
        let check = check_for(format!("http://{addr}/ok"), HttpCheck::default());
        assert!(check.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_unexpected_status() {
        let addr = serve(Router::new().route(
            "/ok",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let check = check_for(format!("http://{addr}/ok"), HttpCheck::default());
        let err = check.execute().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unexpected status code: '500' expected: '200'"
        );
    }

    #[tokio::test]
    async fn test_expected_status_override() {
        let addr = serve(Router::new().route(
            "/ok",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;
        let check = check_for(
            format!("http://{addr}/ok"),
            HttpCheck {
                expected_status: 500,
                ..HttpCheck::default()
            },
        );
        assert!(check.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_expected_body() {
        let addr = serve(Router::new().route("/ok", get(|| async { "all good here" }))).await;

        let check = check_for(
            format!("http://{addr}/ok"),
            HttpCheck {
                expected_body: "good".to_string(),
                ..HttpCheck::default()
            },
        );
        assert!(check.execute().await.is_ok());

        let check = check_for(
            format!("http://{addr}/ok"),
            HttpCheck {
                expected_body: "bad".to_string(),
                ..HttpCheck::default()
            },
        );
        let err = check.execute().await.unwrap_err();
        assert!(err
            .to_string()
            .contains("does not contain expected content"));
    }

    #[tokio::test]
    async fn test_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let check = check_for(format!("http://{addr}/"), HttpCheck::default());
        let err = check.execute().await.unwrap_err();
        assert!(err.to_string().starts_with("failed to execute \"GET\" request"));
    }
}
