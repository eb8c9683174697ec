//! Check configuration model.
//!
//! All duration fields are humantime strings in YAML ("1s", "30s", "24h").
//! Unset fields fall back to the per-check defaults applied by the check
//! constructors.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The full checks configuration, one map per check variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckersConfig {
    pub informer: InformerConfig,
    pub http_checks: HashMap<String, HttpCheck>,
    pub grpc_checks: HashMap<String, GrpcCheck>,
    pub dns_checks: HashMap<String, DnsCheck>,
    pub conn_checks: HashMap<String, ConnCheck>,
    pub tls_checks: HashMap<String, TlsCheck>,
    pub k8s_checks: HashMap<String, K8sCheck>,
    pub k8s_pings: HashMap<String, K8sPing>,
}

impl CheckersConfig {
    /// Parse a configuration document from YAML (or JSON, which is a YAML
    /// subset). Used by the checks API for request bodies.
    pub fn from_yaml(raw: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(raw).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Whether no checks are configured at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.http_checks.is_empty()
            && self.grpc_checks.is_empty()
            && self.dns_checks.is_empty()
            && self.conn_checks.is_empty()
            && self.tls_checks.is_empty()
            && self.k8s_checks.is_empty()
            && self.k8s_pings.is_empty()
    }
}

/// Upstream replication configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InformerConfig {
    /// When set, checks are not executed locally, only replicated upstream.
    pub inform_only: bool,
    /// How often all checks are re-pushed upstream to absorb missed
    /// deliveries. Defaults to 24h; should not be done too frequently.
    #[serde(rename = "syncInterval", with = "humantime_serde")]
    pub refresh_interval: Option<Duration>,
    pub upstreams: Vec<Upstream>,
}

/// An upstream synthetic-checker that receives replicated check config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Upstream {
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Properties common to all check variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BaseCheck {
    /// Timeout for a single execution, defaults to 1s.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// How often the check runs, defaults to 30s.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,
    /// How long to wait before the first execution.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub initial_delay: Option<Duration>,
}

impl BaseCheck {
    pub(crate) fn timeout_or_default(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(1))
    }

    pub(crate) fn interval_or_default(&self) -> Duration {
        match self.interval {
            Some(interval) if !interval.is_zero() => interval,
            _ => Duration::from_secs(30),
        }
    }

    pub(crate) fn initial_delay_or_default(&self) -> Duration {
        self.initial_delay.unwrap_or_default()
    }
}

/// Configuration for a check against the response from a URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpCheck {
    /// The URL to be checked. Required.
    pub url: String,
    /// HTTP method, defaults to GET.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Headers to set on the request.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Optional request body.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    /// Expected response status code, defaults to 200.
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub expected_status: u16,
    /// When set, the response body must contain this substring.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expected_body: String,
    /// Minimum remaining validity of the server certificate.
    #[serde(
        rename = "expiryThreshold",
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub cert_expiry_threshold: Option<Duration>,
    #[serde(flatten)]
    pub base: BaseCheck,
}

/// Configuration for a gRPC health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrpcCheck {
    /// Host and port to connect to. Required.
    pub address: String,
    /// Service name to check.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    /// User-agent header value for health check requests.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    /// Timeout for establishing the connection.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub conn_timeout: Option<Duration>,
    /// Metadata sent in the RPC request context.
    #[serde(rename = "RPCHeaders", skip_serializing_if = "HashMap::is_empty")]
    pub rpc_headers: HashMap<String, String>,
    /// Timeout for the health-check RPC.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub rpc_timeout: Option<Duration>,
    /// Whether to use TLS.
    pub tls: bool,
    /// Skip certificate verification.
    pub tls_no_verify: bool,
    /// Path to a file containing root CA certificates.
    #[serde(rename = "tlscaCert", skip_serializing_if = "String::is_empty")]
    pub tls_ca_cert: String,
    /// Client certificate for authenticating to the server.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_client_cert: String,
    /// Private key for authenticating to the server.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_client_key: String,
    /// Overrides the hostname used to verify the server certificate.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls_server_name: String,
    /// Compress requests with gzip.
    pub gzip: bool,
    #[serde(flatten)]
    pub base: BaseCheck,
}

/// Configuration for a TLS connection and certificate check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsCheck {
    /// Host (and optional port, defaults to 443) to connect to. Required.
    pub address: String,
    /// Host names the certificate should be valid for, defaults to the host
    /// part of the address.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host_names: Vec<String>,
    /// Minimum remaining certificate validity, defaults to 7 days.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub expiry_threshold: Option<Duration>,
    /// Skip certificate verification when establishing the connection.
    pub insecure_skip_verify: bool,
    /// Limit validation to the leaf certificate.
    pub skip_chain_validation: bool,
    #[serde(flatten)]
    pub base: BaseCheck,
}

/// Configuration for a DNS resolution check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DnsCheck {
    /// DNS name to resolve. Required.
    pub host: String,
    /// Minimum number of results the query must return, defaults to 1.
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub min_required_results: usize,
    #[serde(flatten)]
    pub base: BaseCheck,
}

/// Configuration for a connectivity check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnCheck {
    /// Host and port to dial. Required.
    pub address: String,
    /// Protocol to use, "tcp" (default) or "udp".
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(flatten)]
    pub base: BaseCheck,
}

/// Configuration for a check on the status of Kubernetes resources.
///
/// Supports any resource type that uses standard status conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K8sCheck {
    /// Resource kind in `Kind`, `Kind.version` or `Kind.version.group` form.
    pub kind: String,
    /// Namespace to look in; all namespaces when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Fetch a single resource by name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Comma-separated list of key=value labels.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label_selector: String,
    /// Comma-separated list of key=value fields.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field_selector: String,
    #[serde(flatten)]
    pub base: BaseCheck,
}

/// Configuration for a connectivity check against all pods matching a
/// selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K8sPing {
    /// Namespace to look in; all namespaces when empty.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Comma-separated list of key=value labels.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label_selector: String,
    /// Protocol to use, "tcp" (default) or "udp".
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    /// Port to ping on every matched pod.
    pub port: u16,
    #[serde(flatten)]
    pub base: BaseCheck,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_config() {
        let raw = br#"
informer:
  informOnly: false
  syncInterval: 12h
  upstreams:
    - url: http://peer:8080
      headers:
        Authorization: Basic dXNlcjpwYXNz
      timeout: 5s
httpChecks:
  status:
    url: https://example.com/status
    method: GET
    expectedStatus: 200
    interval: 1m
dnsChecks:
  example:
    host: example.com
    minRequiredResults: 2
connChecks:
  gateway:
    address: gw.example.com:443
tlsChecks:
  cert:
    address: example.com
    expiryThreshold: 168h
k8sChecks:
  deployments:
    kind: Deployment.v1.apps
    namespace: default
k8sPings:
  pods:
    namespace: default
    labelSelector: app=web
    port: 8080
"#;
        let cfg = CheckersConfig::from_yaml(raw).unwrap();
        assert_eq!(cfg.informer.upstreams.len(), 1);
        assert_eq!(
            cfg.informer.refresh_interval,
            Some(Duration::from_secs(12 * 3600))
        );
        assert_eq!(
            cfg.http_checks["status"].base.interval,
            Some(Duration::from_secs(60))
        );
        assert_eq!(cfg.dns_checks["example"].min_required_results, 2);
        assert_eq!(cfg.conn_checks["gateway"].address, "gw.example.com:443");
        assert_eq!(
            cfg.tls_checks["cert"].expiry_threshold,
            Some(Duration::from_secs(168 * 3600))
        );
        assert_eq!(cfg.k8s_checks["deployments"].kind, "Deployment.v1.apps");
        assert_eq!(cfg.k8s_pings["pods"].port, 8080);
    }

    #[test]
    fn test_base_defaults() {
        let base = BaseCheck::default();
        assert_eq!(base.timeout_or_default(), Duration::from_secs(1));
        assert_eq!(base.interval_or_default(), Duration::from_secs(30));
        assert_eq!(base.initial_delay_or_default(), Duration::ZERO);
    }

    #[test]
    fn test_check_config_round_trip() {
        let check = HttpCheck {
            url: "https://example.com".to_string(),
            method: "POST".to_string(),
            body: "ping".to_string(),
            expected_status: 201,
            base: BaseCheck {
                interval: Some(Duration::from_secs(10)),
                ..BaseCheck::default()
            },
            ..HttpCheck::default()
        };
        let encoded = serde_json::to_value(&check).unwrap();
        let decoded: HttpCheck = serde_json::from_value(encoded).unwrap();
        assert_eq!(check, decoded);
    }
}
