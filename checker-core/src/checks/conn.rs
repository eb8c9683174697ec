use std::time::Duration;

use async_trait::async_trait;

use crate::check::{Check, CheckDescriptor};
use crate::config::ConnCheck;
use crate::error::{Error, Result};

use super::util;

/// Connectivity check that dials the configured address once per run.
pub struct ConnChecker {
    name: String,
    config: ConnCheck,
}

impl ConnChecker {
    pub fn new(name: &str, mut config: ConnCheck) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::Configuration("check name must not be empty".into()));
        }
        if config.address.is_empty() {
            return Err(Error::Configuration("address must not be empty".into()));
        }
        if config.protocol.is_empty() {
            config.protocol = "tcp".to_string();
        }
        util::validate_protocol(&config.protocol)?;

        Ok(Self {
            name: name.to_string(),
            config,
        })
    }
}

#[async_trait]
impl Check for ConnChecker {
    async fn execute(&self) -> Result<()> {
        util::dial(
            &self.config.protocol,
            &self.config.address,
            self.config.base.timeout_or_default(),
        )
        .await
    }

    fn interval(&self) -> Duration {
        self.config.base.interval_or_default()
    }

    fn initial_delay(&self) -> Duration {
        self.config.base.initial_delay_or_default()
    }

    fn describe(&self) -> Result<CheckDescriptor> {
        CheckDescriptor::new("conn", &self.name, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_rejects_invalid_config() {
        assert!(ConnChecker::new("", ConnCheck::default()).is_err());
        assert!(ConnChecker::new("test", ConnCheck::default()).is_err());
        let bad_protocol = ConnCheck {
            address: "localhost:80".to_string(),
            protocol: "unixpacket".to_string(),
            ..ConnCheck::default()
        };
        assert!(ConnChecker::new("test", bad_protocol).is_err());
    }

    #[tokio::test]
    async fn test_tcp_connect_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let check = ConnChecker::new(
            "test",
            ConnCheck {
                address: addr.to_string(),
                ..ConnCheck::default()
            },
        )
        .unwrap();
        assert!(check.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let check = ConnChecker::new(
            "test",
            ConnCheck {
                address: addr.to_string(),
                ..ConnCheck::default()
            },
        )
        .unwrap();
        let err = check.execute().await.unwrap_err();
        assert!(err.to_string().starts_with("failed to connect"));
    }

    #[tokio::test]
    async fn test_udp_connect_ok() {
        let check = ConnChecker::new(
            "test",
            ConnCheck {
                address: "127.0.0.1:53".to_string(),
                protocol: "udp".to_string(),
                ..ConnCheck::default()
            },
        )
        .unwrap();
        assert!(check.execute().await.is_ok());
    }

    #[test]
    fn test_describe() {
        let check = ConnChecker::new(
            "test",
            ConnCheck {
                address: "example.com:443".to_string(),
                ..ConnCheck::default()
            },
        )
        .unwrap();
        let desc = check.describe().unwrap();
        assert_eq!(desc.kind, "conn");
        assert_eq!(desc.key(), "test-conn");
        assert_eq!(desc.config["address"], "example.com:443");
    }
}
