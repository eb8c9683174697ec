//! Error types for the cluster module

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Kubernetes error: {0}")]
    Kubernetes(String),

    #[error("Check error: {0}")]
    Check(#[from] checker_core::Error),
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::Kubernetes(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
