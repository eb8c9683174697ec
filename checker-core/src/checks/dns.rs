use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tokio::time::timeout;

use crate::check::{Check, CheckDescriptor};
use crate::config::DnsCheck;
use crate::error::{Error, Result};

/// DNS check that resolves a host through the system resolver and requires a
/// minimum number of results.
pub struct DnsChecker {
    name: String,
    config: DnsCheck,
    resolver: TokioAsyncResolver,
}

impl DnsChecker {
    pub fn new(name: &str, mut config: DnsCheck) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Configuration("check name must not be empty".into()));
        }
        if config.host.is_empty() {
            return Err(Error::Configuration("host must not be empty".into()));
        }
        if config.min_required_results == 0 {
            config.min_required_results = 1;
        }

        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Configuration(format!("system resolver: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            config,
            resolver,
        })
    }
}

#[async_trait]
impl Check for DnsChecker {
    async fn execute(&self) -> Result<()> {
        let host = &self.config.host;
        let lookup = timeout(
            self.config.base.timeout_or_default(),
            self.resolver.lookup_ip(host.as_str()),
        )
        .await
        .map_err(|_| Error::Dns {
            host: host.clone(),
            message: "i/o timeout".to_string(),
        })?
        .map_err(|e| Error::Dns {
            host: host.clone(),
            message: e.to_string(),
        })?;

        let found = lookup.iter().count();
        if found < self.config.min_required_results {
            return Err(Error::InsufficientResults {
                got: found,
                want: self.config.min_required_results,
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
        CheckDescriptor::new("dns", &self.name, &self.config)
    }
}
