use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Self-description of a check for replication to upstream peers.
///
/// `kind` and `name` form the check key (`<name>-<kind>`), `config` is the
/// JSON form of the check's configuration as accepted by the checks API.
#[derive(Debug, Clone)]
pub struct CheckDescriptor {
    pub kind: String,
    pub name: String,
    pub config: serde_json::Value,
}

impl CheckDescriptor {
    pub fn new<C: serde::Serialize>(kind: &str, name: &str, config: &C) -> Result<Self> {
        Ok(Self {
            kind: kind.to_string(),
            name: name.to_string(),
            config: serde_json::to_value(config)?,
        })
    }

    /// The scheduler key for this check.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}-{}", self.name, self.kind)
    }
}

/// The contract every check variant satisfies.
#[async_trait]
pub trait Check: Send + Sync {
    /// Run the check once. `Ok(())` is a pass; the error's display string
    /// becomes the recorded status error on failure.
    async fn execute(&self) -> Result<()>;

    /// How often the check should run.
    fn interval(&self) -> Duration;

    /// How long to wait before the first execution.
    fn initial_delay(&self) -> Duration;

    /// Self-describing tuple used for upstream replication.
    fn describe(&self) -> Result<CheckDescriptor>;
}

pub type DynCheck = Arc<dyn Check>;
