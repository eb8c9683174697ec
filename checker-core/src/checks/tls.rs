use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::check::{Check, CheckDescriptor};
use crate::config::TlsCheck;
use crate::error::{Error, Result};

use super::util::human_duration;

const DAY: Duration = Duration::from_secs(24 * 3600);

/// TLS connectivity check that validates the presented leaf certificate
/// against the configured host names and its validity window.
pub struct TlsChecker {
    name: String,
    config: TlsCheck,
    connector: TlsConnector,
}

impl TlsChecker {
    pub fn new(name: &str, mut config: TlsCheck) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Configuration("check name must not be empty".into()));
        }
        if config.address.is_empty() {
            return Err(Error::Configuration("address must not be empty".into()));
        }
        if !config.address.contains(':') {
            config.address.push_str(":443");
        }
        if config.expiry_threshold.is_none() {
            config.expiry_threshold = Some(7 * DAY);
        }
        if config.host_names.is_empty() {
            config.host_names.push(host_of(&config.address).to_string());
        }

        let skip_verification = config.insecure_skip_verify || config.skip_chain_validation;
        let connector = TlsConnector::from(Arc::new(client_config(skip_verification)));

        Ok(Self {
            name: name.to_string(),
            config,
            connector,
        })
    }
}

#[async_trait]
impl Check for TlsChecker {
    async fn execute(&self) -> Result<()> {
        let limit = self.config.base.timeout_or_default();
        let stream = handshake(&self.connector, &self.config.address, limit).await?;

        let (_, session) = stream.get_ref();
        let certs = session
            .peer_certificates()
            .ok_or_else(|| Error::Connect("no peer certificates presented".to_string()))?;
        let leaf = certs
            .first()
            .ok_or_else(|| Error::Connect("no peer certificates presented".to_string()))?;
        let (_, cert) = X509Certificate::from_der(leaf.as_ref())
            .map_err(|e| Error::Connect(format!("failed to parse certificate: {e}")))?;

        for host_name in &self.config.host_names {
            if !cert_matches_hostname(&cert, host_name) {
                return Err(Error::HostnameMismatch {
                    host: host_name.clone(),
                    message: "no matching subject alternative name".to_string(),
                });
            }
        }

        let now = chrono::Utc::now().timestamp();
        if now < cert.validity().not_before.timestamp() {
            return Err(Error::CertNotYetValid);
        }

        let remaining = cert.validity().not_after.timestamp() - now;
        let threshold = self.config.expiry_threshold.unwrap_or(7 * DAY);
        if remaining <= threshold.as_secs() as i64 {
            return Err(Error::CertExpiring(human_duration(Duration::from_secs(
                remaining.max(0) as u64,
            ))));
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
        CheckDescriptor::new("tls", &self.name, &self.config)
    }
}

/// Remaining validity of the leaf certificate presented at `address`.
///
/// Used by the HTTP check to enforce its certificate expiry threshold; the
/// handshake skips verification since only the leaf is inspected.
pub(crate) async fn remaining_leaf_validity(address: &str, limit: Duration) -> Result<Duration> {
    let connector = TlsConnector::from(Arc::new(client_config(true)));
    let stream = handshake(&connector, address, limit).await?;
    let (_, session) = stream.get_ref();
    let certs = session
        .peer_certificates()
        .ok_or_else(|| Error::Connect("no peer certificates presented".to_string()))?;
    let leaf = certs
        .first()
        .ok_or_else(|| Error::Connect("no peer certificates presented".to_string()))?;
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| Error::Connect(format!("failed to parse certificate: {e}")))?;

    let remaining = cert.validity().not_after.timestamp() - chrono::Utc::now().timestamp();
    Ok(Duration::from_secs(remaining.max(0) as u64))
}

async fn handshake(
    connector: &TlsConnector,
    address: &str,
    limit: Duration,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let tcp = timeout(limit, TcpStream::connect(address))
        .await
        .map_err(|_| Error::Connect(format!("dial {address}: i/o timeout")))?
        .map_err(|e| Error::Connect(e.to_string()))?;

    let server_name = ServerName::try_from(host_of(address).to_string())
        .map_err(|e| Error::Configuration(format!("invalid server name: {e}")))?;

    timeout(limit, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::Connect(format!("tls handshake with {address}: i/o timeout")))?
        .map_err(|e| Error::Connect(e.to_string()))
}

fn client_config(skip_verification: bool) -> ClientConfig {
    ensure_crypto_provider();
    if skip_verification {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    }
}

/// Installs the aws-lc-rs crypto provider as the process-wide default the
/// first time a TLS client config is built, since feature unification across
/// dependencies otherwise leaves rustls unable to pick one automatically.
fn ensure_crypto_provider() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

fn host_of(address: &str) -> &str {
    address.split(':').next().unwrap_or(address)
}

/// Match a hostname against the leaf certificate's subject alternative
/// names, falling back to the common name only when no SAN is present.
fn cert_matches_hostname(cert: &X509Certificate<'_>, hostname: &str) -> bool {
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        return san.value.general_names.iter().any(|name| match name {
            GeneralName::DNSName(dns) => wildcard_match(dns, hostname),
            _ => false,
        });
    }
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|cn| wildcard_match(cn, hostname))
        .unwrap_or(false)
}

fn wildcard_match(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return match host.split_once('.') {
            Some((_, rest)) => rest == suffix,
            None => false,
        };
    }
    pattern == host
}

/// Accepts any certificate; used when verification is explicitly disabled or
/// limited to the leaf checks this module performs itself.
#[derive(Debug)]
struct NoVerification {
    provider: CryptoProvider,
}

impl NoVerification {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::aws_lc_rs::default_provider(),
        }
    }
}

impl ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
