use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use tokio::time::timeout;

use crate::check::{Check, CheckDescriptor};
use crate::config::K8sPing;
use crate::error::{Error, Result};

use super::k8s::shared_client;
use super::util;

/// Connectivity check that dials every pod matching the selector on the
/// configured port.
pub struct K8sPinger {
    name: String,
    config: K8sPing,
    client: Client,
}

impl K8sPinger {
    pub async fn new(name: &str, config: K8sPing) -> Result<Self> {
        let client = shared_client().await?;
        Self::with_client(name, config, client)
    }

    /// Construct with an explicit client.
    pub fn with_client(name: &str, mut config: K8sPing, client: Client) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Configuration("check name must not be empty".into()));
        }
        if config.protocol.is_empty() {
            config.protocol = "tcp".to_string();
        }
        util::validate_protocol(&config.protocol)?;

        Ok(Self {
            name: name.to_string(),
            config,
            client,
        })
    }

    async fn pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = if self.config.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.config.namespace)
        };

        let mut params = ListParams::default();
        if !self.config.label_selector.is_empty() {
            params = params.labels(&self.config.label_selector);
        }
        let list = timeout(self.config.base.timeout_or_default(), api.list(&params))
            .await
            .map_err(|_| Error::Kube("request timed out".to_string()))?
            .map_err(|e| Error::Kube(format!("failed to list: {e}")))?;
        Ok(list.items)
    }
}

#[async_trait]
impl Check for K8sPinger {
    async fn execute(&self) -> Result<()> {
        let pods = self.pods().await?;

        let total = pods.len();
        if total == 0 {
            return Err(Error::NoResources);
        }

        let limit = self.config.base.timeout_or_default();
        let mut errs: Vec<String> = Vec::new();
        for pod in &pods {
            let name = pod.metadata.name.clone().unwrap_or_default();
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            let address = format!("{name}.{namespace}:{}", self.config.port);
            if let Err(e) = util::dial(&self.config.protocol, &address, limit).await {
                errs.push(e.to_string());
            }
        }

        if let Some(last) = errs.last() {
            return Err(Error::ResourcesUnreachable {
                failed: errs.len(),
                total,
                message: last.clone(),
            });
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
        CheckDescriptor::new("k8sping", &self.name, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_error_message() {
        let err = Error::ResourcesUnreachable {
            failed: 2,
            total: 3,
            message: "failed to connect: connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "2 of 3 resources are not reachable: failed to connect: connection refused"
        );
    }
}
