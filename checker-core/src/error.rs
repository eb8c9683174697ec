use thiserror::Error;

/// Core error types
///
/// Check execution failures carry the exact message that ends up in the
/// check's status record, so variants spell out their wording.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unexpected status code: '{got}' expected: '{expected}'")]
    UnexpectedStatus { got: u16, expected: u16 },

    #[error("body {got:?} does not contain expected content {expected:?}")]
    UnexpectedBody { got: String, expected: String },

    #[error("failed to execute {method:?} request: {message}")]
    HttpRequest { method: String, message: String },

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("lookup {host}: {message}")]
    Dns { host: String, message: String },

    #[error("insufficient number of results: {got} < {want}")]
    InsufficientResults { got: usize, want: usize },

    #[error("hostname {host} doesn't match with certificate: {message}")]
    HostnameMismatch { host: String, message: String },

    #[error("the certificate is not yet valid")]
    CertNotYetValid,

    #[error("the certificate will expire in {0}")]
    CertExpiring(String),

    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("service unhealthy (responded with {0:?})")]
    Unhealthy(String),

    #[error("no resources found")]
    NoResources,

    #[error("{failed} of {total} resources are not ok: {message}")]
    ResourcesNotOk {
        failed: usize,
        total: usize,
        message: String,
    },

    #[error("{failed} of {total} resources are not reachable: {message}")]
    ResourcesUnreachable {
        failed: usize,
        total: usize,
        message: String,
    },

    #[error("Kubernetes error: {0}")]
    Kube(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::Kube(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
