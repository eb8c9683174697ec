//! Lease-based leader election.
//!
//! At most one replica holds the `synthetic-checker` Lease at a time. The
//! holder schedules checks; every other replica mirrors the leader's status
//! by polling it. Losing the lease is terminal for the process so that a
//! demoted instance can never keep writing status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use checker_core::runner::SyncFn;

use crate::error::{Error, Result};

const LOCK_NAME: &str = "synthetic-checker";
const IN_CLUSTER_NAMESPACE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_DEADLINE: Duration = Duration::from_secs(10);
const RETRY_PERIOD: Duration = Duration::from_secs(2);
const SYNC_PERIOD: Duration = Duration::from_secs(9);

/// Invoked once when this replica becomes the leader; receives a token that
/// is cancelled when the election shuts down.
pub type RunFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

pub struct LeaderElector {
    pub id: String,
    namespace: String,
    client: Client,
}

fn in_cluster_namespace() -> Result<String> {
    match std::fs::read_to_string(IN_CLUSTER_NAMESPACE_PATH) {
        Ok(namespace) => Ok(namespace.trim().to_string()),
        Err(_) => Err(Error::Configuration(
            "not running in-cluster, please specify the leader election namespace".to_string(),
        )),
    }
}

/// Resolve the election identity: explicit id, `POD_NAME`, then hostname.
fn resolve_identity(id: &str) -> Result<String> {
    if !id.is_empty() {
        return Ok(id.to_string());
    }
    if let Ok(pod_name) = std::env::var("POD_NAME") {
        if !pod_name.is_empty() {
            return Ok(pod_name);
        }
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Configuration("cannot determine election identity".to_string()))
}

impl LeaderElector {
    pub async fn new(id: &str, namespace: &str) -> Result<Self> {
        let id = resolve_identity(id)?;
        let namespace = if namespace.is_empty() {
            in_cluster_namespace()?
        } else {
            namespace.to_string()
        };
        let client = Client::try_default().await?;

        Ok(Self {
            id,
            namespace,
            client,
        })
    }

    /// Run the election until the token is cancelled.
    ///
    /// * became leader: `run` is invoked once with a child token.
    /// * lost leadership: the process exits so a replacement replica can win
    ///   a clean election.
    /// * following: `sync` is invoked with the current leader every 9s.
    pub async fn run(&self, token: CancellationToken, run: RunFn, sync: SyncFn) {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let (leader_tx, leader_rx) = watch::channel(String::new());
        let mut follower_stop: Option<CancellationToken> = None;
        let mut run = Some(run);
        let mut was_leader = false;
        let mut observed: Option<String> = None;
        let mut last_renew = Instant::now();

        let mut ticker = interval(RETRY_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    if let Some(stop) = follower_stop.take() {
                        stop.cancel();
                    }
                    if was_leader {
                        self.release(&api).await;
                    }
                    return;
                }
                _ = ticker.tick() => {}
            }

            let holder = match self.try_acquire_or_renew(&api).await {
                Ok(holder) => holder,
                Err(e) => {
                    warn!(error = %e, "leader election error");
                    if was_leader && last_renew.elapsed() >= RENEW_DEADLINE {
                        error!("failed to renew leader lease within the renew deadline");
                        std::process::exit(1);
                    }
                    continue;
                }
            };

            let is_leader = holder == self.id;
            if is_leader {
                last_renew = Instant::now();
            }

            if observed.as_deref() != Some(holder.as_str()) {
                info!(leader = %holder, "new leader");
                observed = Some(holder.clone());
            }

            if is_leader {
                if let Some(stop) = follower_stop.take() {
                    // We were following a peer and just took over.
                    stop.cancel();
                }
                if !was_leader {
                    info!("I'm the leader");
                    if let Some(run) = run.take() {
                        tokio::spawn(run(token.child_token()));
                    }
                }
            } else {
                let _ = leader_tx.send(holder.clone());
                if was_leader {
                    error!("no longer the leader");
                    std::process::exit(1);
                }
                if follower_stop.is_none() {
                    let stop = CancellationToken::new();
                    follower_stop = Some(stop.clone());
                    tokio::spawn(follower_loop(leader_rx.clone(), sync.clone(), stop));
                }
            }

            was_leader = is_leader;
        }
    }

    /// One round of the acquire/renew protocol. Returns the current holder.
    async fn try_acquire_or_renew(&self, api: &Api<Lease>) -> Result<String> {
        let now = MicroTime(Utc::now());

        let Some(mut lease) = api.get_opt(LOCK_NAME).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LOCK_NAME.to_string()),
                    ..ObjectMeta::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(self.id.clone()),
                    lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                    acquire_time: Some(now.clone()),
                    renew_time: Some(now),
                    lease_transitions: Some(0),
                    ..LeaseSpec::default()
                }),
            };
            api.create(&PostParams::default(), &lease).await?;
            return Ok(self.id.clone());
        };

        let spec = lease.spec.clone().unwrap_or_default();
        let holder = spec.holder_identity.clone().unwrap_or_default();
        let duration = spec
            .lease_duration_seconds
            .map(|s| Duration::from_secs(s.max(0) as u64))
            .unwrap_or(LEASE_DURATION);
        let expired = lease_expired(spec.renew_time.as_ref().map(|t| t.0), Utc::now(), duration);

        if holder == self.id || holder.is_empty() || expired {
            let renewing = holder == self.id;
            lease.spec = Some(LeaseSpec {
                holder_identity: Some(self.id.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: if renewing {
                    spec.acquire_time.clone().or_else(|| Some(now.clone()))
                } else {
                    Some(now.clone())
                },
                renew_time: Some(now),
                lease_transitions: Some(if renewing {
                    spec.lease_transitions.unwrap_or(0)
                } else {
                    spec.lease_transitions.unwrap_or(0) + 1
                }),
                ..LeaseSpec::default()
            });
            // Replace carries the resource version, so a racing replica
            // gets a conflict and retries on its next tick.
            api.replace(LOCK_NAME, &PostParams::default(), &lease)
                .await?;
            return Ok(self.id.clone());
        }

        Ok(holder)
    }

    /// Best-effort lease release on shutdown.
    async fn release(&self, api: &Api<Lease>) {
        let patch = serde_json::json!({
            "spec": {"holderIdentity": null, "renewTime": null}
        });
        if let Err(e) = api
            .patch(LOCK_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            warn!(error = %e, "failed to release leader lease");
        }
    }
}

fn lease_expired(
    renew_time: Option<chrono::DateTime<Utc>>,
    now: chrono::DateTime<Utc>,
    duration: Duration,
) -> bool {
    match renew_time {
        Some(renewed) => (now - renewed).num_seconds() >= duration.as_secs() as i64,
        None => true,
    }
}

/// Poll the leader's status on a fixed cadence until told to stop. Picks up
/// leader changes through the watch channel.
async fn follower_loop(leader: watch::Receiver<String>, sync: SyncFn, stop: CancellationToken) {
    loop {
        let current = leader.borrow().clone();
        if !current.is_empty() {
            sync(current).await;
        }
        tokio::select! {
            () = stop.cancelled() => return,
            () = tokio::time::sleep(SYNC_PERIOD) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_identity_prefers_explicit() {
        assert_eq!(resolve_identity("me").unwrap(), "me");
    }

    #[test]
    fn test_resolve_identity_falls_back_to_hostname() {
        // POD_NAME is unset in tests, the hostname is always available.
        let id = resolve_identity("").unwrap();
        assert!(!id.is_empty());
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let duration = Duration::from_secs(15);
        assert!(lease_expired(None, now, duration));
        assert!(lease_expired(
            Some(now - chrono::Duration::seconds(20)),
            now,
            duration
        ));
        assert!(!lease_expired(
            Some(now - chrono::Duration::seconds(5)),
            now,
            duration
        ));
    }
}
