use std::time::Duration;

use async_trait::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tonic::Request;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::warn;

use crate::check::{Check, CheckDescriptor};
use crate::config::GrpcCheck;
use crate::error::{Error, Result};

/// gRPC health check that calls `Health.Check` for the configured service
/// and passes only on a `SERVING` response.
pub struct GrpcChecker {
    name: String,
    config: GrpcCheck,
    endpoint: Endpoint,
}

impl GrpcChecker {
    pub fn new(name: &str, config: GrpcCheck) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Configuration("check name must not be empty".into()));
        }
        if config.address.is_empty() {
            return Err(Error::Configuration("address must not be empty".into()));
        }

        let scheme = if config.tls { "https" } else { "http" };
        let mut endpoint = Channel::from_shared(format!("{scheme}://{}", config.address))
            .map_err(|e| Error::Configuration(format!("invalid address: {e}")))?
            .connect_timeout(conn_timeout(&config))
            .timeout(rpc_timeout(&config));

        if !config.user_agent.is_empty() {
            endpoint = endpoint
                .user_agent(config.user_agent.clone())
                .map_err(|e| Error::Configuration(format!("invalid user agent: {e}")))?;
        }

        if config.tls {
            endpoint = endpoint
                .tls_config(build_tls_config(&config)?)
                .map_err(|e| Error::Configuration(format!("invalid tls config: {e}")))?;
        }

        Ok(Self {
            name: name.to_string(),
            config,
            endpoint,
        })
    }
}

fn conn_timeout(config: &GrpcCheck) -> Duration {
    config
        .conn_timeout
        .unwrap_or_else(|| config.base.timeout_or_default())
}

fn rpc_timeout(config: &GrpcCheck) -> Duration {
    config
        .rpc_timeout
        .unwrap_or_else(|| config.base.timeout_or_default())
}

fn build_tls_config(config: &GrpcCheck) -> Result<ClientTlsConfig> {
    let mut tls = ClientTlsConfig::new().with_webpki_roots();

    if config.tls_no_verify {
        // tonic channels always verify the presented chain; the flag is kept
        // for config compatibility but cannot turn verification off.
        warn!("tlsNoVerify is not supported for gRPC checks, certificate verification stays on");
    }

    if !config.tls_ca_cert.is_empty() {
        let pem = std::fs::read(&config.tls_ca_cert).map_err(|e| {
            Error::Configuration(format!(
                "failed to load root CA certificates from file ({}): {e}",
                config.tls_ca_cert
            ))
        })?;
        tls = tls.ca_certificate(Certificate::from_pem(pem));
    }

    if !config.tls_client_cert.is_empty() && !config.tls_client_key.is_empty() {
        let cert = std::fs::read(&config.tls_client_cert).map_err(|e| {
            Error::Configuration(format!("failed to load tls client cert: {e}"))
        })?;
        let key = std::fs::read(&config.tls_client_key)
            .map_err(|e| Error::Configuration(format!("failed to load tls client key: {e}")))?;
        tls = tls.identity(Identity::from_pem(cert, key));
    }

    if !config.tls_server_name.is_empty() {
        tls = tls.domain_name(config.tls_server_name.clone());
    }

    Ok(tls)
}

#[async_trait]
impl Check for GrpcChecker {
    async fn execute(&self) -> Result<()> {
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        let mut client = HealthClient::new(channel);
        if self.config.gzip {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }

        let mut request = Request::new(HealthCheckRequest {
            service: self.config.service.clone(),
        });
        for (header, value) in &self.config.rpc_headers {
            let key: MetadataKey<Ascii> = header
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid RPC header name: {header}")))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid RPC header value: {value}")))?;
            request.metadata_mut().insert(key, value);
        }

        let response = client
            .check(request)
            .await
            .map_err(|e| Error::Rpc(e.to_string()))?
            .into_inner();

        let status = response.status();
        if status != ServingStatus::Serving {
            return Err(Error::Unhealthy(format!("{status:?}")));
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
        CheckDescriptor::new("grpc", &self.name, &self.config)
    }
}
