use serde::{Deserialize, Serialize};

/// BasicAuth credentials for the HTTP server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub user: String,
    pub pass: String,
}

impl AuthConfig {
    /// Auth is enabled only when both credentials are configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.user.is_empty() && !self.pass.is_empty()
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Port for the TLS listener, served only when a certificate is
    /// configured.
    pub secure_port: u16,
    /// Path to the PEM server certificate chain.
    pub cert_file: String,
    /// Path to the PEM private key.
    pub key_file: String,
    pub auth: AuthConfig,
    /// Indent the JSON status responses.
    pub pretty_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            secure_port: 8443,
            cert_file: String::new(),
            key_file: String::new(),
            auth: AuthConfig::default(),
            pretty_json: false,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn secure_address(&self) -> String {
        format!("{}:{}", self.host, self.secure_port)
    }

    /// The TLS listener runs only when both certificate and key are set.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }
}
