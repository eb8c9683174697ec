use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::check::{Check, CheckDescriptor};
use crate::config::K8sCheck;
use crate::error::{Error, Result};

use super::kstatus::{self, StatusKind};

static K8S_CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared Kubernetes client, built once per process from the usual
/// kubeconfig/in-cluster environment.
pub(crate) async fn shared_client() -> Result<Client> {
    K8S_CLIENT
        .get_or_try_init(|| async {
            Client::try_default()
                .await
                .map_err(|e| Error::Configuration(format!("failed to create client: {e}")))
        })
        .await
        .cloned()
}

/// Check that lists (or gets) Kubernetes resources and requires every one of
/// them to compute to the `Current` kstatus.
pub struct K8sChecker {
    name: String,
    config: K8sCheck,
    resource: ApiResource,
    client: Client,
}

impl K8sChecker {
    pub async fn new(name: &str, config: K8sCheck) -> Result<Self> {
        let client = shared_client().await?;
        Self::with_client(name, config, client)
    }

    /// Construct with an explicit client.
    pub fn with_client(name: &str, config: K8sCheck, client: Client) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Configuration("check name must not be empty".into()));
        }
        if config.kind.is_empty() {
            return Err(Error::Configuration("kind must not be empty".into()));
        }
        let resource = ApiResource::from_gvk(&parse_kind_arg(&config.kind));

        Ok(Self {
            name: name.to_string(),
            config,
            resource,
            client,
        })
    }

    fn api(&self) -> Api<DynamicObject> {
        if self.config.namespace.is_empty() {
            Api::all_with(self.client.clone(), &self.resource)
        } else {
            Api::namespaced_with(self.client.clone(), &self.config.namespace, &self.resource)
        }
    }

    async fn fetch(&self) -> Result<Vec<DynamicObject>> {
        let api = self.api();
        let limit = self.config.base.timeout_or_default();

        if !self.config.name.is_empty() {
            let obj = timeout(limit, api.get(&self.config.name))
                .await
                .map_err(|_| Error::Kube("request timed out".to_string()))?
                .map_err(|e| Error::Kube(format!("failed to get: {e}")))?;
            return Ok(vec![obj]);
        }

        let mut params = ListParams::default();
        if !self.config.label_selector.is_empty() {
            params = params.labels(&self.config.label_selector);
        }
        if !self.config.field_selector.is_empty() {
            params = params.fields(&self.config.field_selector);
        }
        let list = timeout(limit, api.list(&params))
            .await
            .map_err(|_| Error::Kube("request timed out".to_string()))?
            .map_err(|e| Error::Kube(format!("failed to list: {e}")))?;
        Ok(list.items)
    }
}

#[async_trait]
impl Check for K8sChecker {
    async fn execute(&self) -> Result<()> {
        let items = self.fetch().await?;

        let total = items.len();
        if total == 0 {
            return Err(Error::NoResources);
        }

        let mut errs: Vec<String> = Vec::new();
        for item in &items {
            let res = kstatus::compute(item);
            if res.status != StatusKind::Current {
                let name = item.metadata.name.clone().unwrap_or_default();
                errs.push(format!(
                    "{name}: wrong resource state: {} - {}",
                    res.status, res.message
                ));
            }
        }

        if let Some(last) = errs.last() {
            return Err(Error::ResourcesNotOk {
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
        CheckDescriptor::new("k8s", &self.name, &self.config)
    }
}

/// Parse a `Kind`, `Kind.version` or `Kind.version.group` argument.
fn parse_kind_arg(kind: &str) -> GroupVersionKind {
    let mut parts = kind.splitn(3, '.');
    let k = parts.next().unwrap_or_default();
    match (parts.next(), parts.next()) {
        (Some(version), Some(group)) => GroupVersionKind::gvk(group, version, k),
        (Some(version), None) => GroupVersionKind::gvk("", version, k),
        _ => GroupVersionKind::gvk("", "v1", k),
    }
}
