//! The check runner: schedules every configured check on its own loop,
//! owns the status store, and drives upstream replication.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::check::{Check, DynCheck};
use crate::checks::{
    ConnChecker, DnsChecker, GrpcChecker, HttpChecker, K8sChecker, K8sPinger, TlsChecker,
};
use crate::config::CheckersConfig;
use crate::error::Result;
use crate::informer::Informer;
use crate::status::{Status, StatusStore, Statuses};

const DEFAULT_UPSTREAM_REFRESH: Duration = Duration::from_secs(24 * 3600);

/// A follower-sync routine: called with the current leader's identity.
pub type SyncFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Scheduled {
    checks: HashMap<String, DynCheck>,
    /// A key is present here iff a loop is currently scheduled for it.
    stops: HashMap<String, CancellationToken>,
}

/// The main check runner, responsible for scheduling and executing all
/// configured checks.
pub struct Runner {
    scheduled: RwLock<Scheduled>,
    status: StatusStore,
    informer: Option<Arc<Informer>>,
    inform_only: bool,
    upstream_refresh: Duration,
    refresher_started: AtomicBool,
    sync_client: reqwest::Client,
}

impl Runner {
    /// Create a runner from the given configuration, optionally starting
    /// every check loop immediately.
    pub async fn new_from_config(cfg: &CheckersConfig, start: bool) -> Result<Arc<Self>> {
        let informer = if cfg.informer.upstreams.is_empty() {
            None
        } else {
            Some(Arc::new(Informer::new(cfg.informer.upstreams.clone())?))
        };

        let upstream_refresh = match cfg.informer.refresh_interval {
            Some(refresh) if !refresh.is_zero() => refresh,
            _ => DEFAULT_UPSTREAM_REFRESH,
        };

        let runner = Arc::new(Self {
            scheduled: RwLock::new(Scheduled::default()),
            status: StatusStore::new(),
            inform_only: cfg.informer.inform_only,
            informer,
            upstream_refresh,
            refresher_started: AtomicBool::new(false),
            sync_client: reqwest::Client::new(),
        });

        runner.add_from_config(cfg, start).await?;
        Ok(runner)
    }

    /// Load every check family from the configuration. Check keys are
    /// `<name>-<kind>`; existing keys are replaced in place.
    pub async fn add_from_config(self: &Arc<Self>, cfg: &CheckersConfig, start: bool) -> Result<()> {
        for (name, config) in &cfg.http_checks {
            let check = HttpChecker::new(name, config.clone())?;
            self.add_check(format!("{name}-http"), Arc::new(check), start)
                .await;
        }

        for (name, config) in &cfg.dns_checks {
            let check = DnsChecker::new(name, config.clone())?;
            self.add_check(format!("{name}-dns"), Arc::new(check), start)
                .await;
        }

        for (name, config) in &cfg.k8s_checks {
            let check = K8sChecker::new(name, config.clone()).await?;
            self.add_check(format!("{name}-k8s"), Arc::new(check), start)
                .await;
        }

        for (name, config) in &cfg.conn_checks {
            let check = ConnChecker::new(name, config.clone())?;
            self.add_check(format!("{name}-conn"), Arc::new(check), start)
                .await;
        }

        for (name, config) in &cfg.tls_checks {
            let check = TlsChecker::new(name, config.clone())?;
            self.add_check(format!("{name}-tls"), Arc::new(check), start)
                .await;
        }

        for (name, config) in &cfg.grpc_checks {
            let check = GrpcChecker::new(name, config.clone())?;
            self.add_check(format!("{name}-grpc"), Arc::new(check), start)
                .await;
        }

        for (name, config) in &cfg.k8s_pings {
            let check = K8sPinger::new(name, config.clone()).await?;
            self.add_check(format!("{name}-k8sping"), Arc::new(check), start)
                .await;
        }

        Ok(())
    }

    /// Schedule a new check under the given key.
    ///
    /// Replacing an existing key stops its loop and starts a fresh one with
    /// the new check, so a changed cadence takes effect immediately. In
    /// inform-only mode nothing is scheduled, only replicated.
    pub async fn add_check(self: &Arc<Self>, key: impl Into<String>, check: DynCheck, start: bool) {
        let key = key.into();
        let start = start && !self.inform_only;
        info!(name = %key, "new check");

        {
            let mut scheduled = self.scheduled.write().await;
            let was_running = match scheduled.stops.remove(&key) {
                Some(stop) => {
                    stop.cancel();
                    true
                }
                None => false,
            };
            scheduled.checks.insert(key.clone(), check.clone());
            if was_running || start {
                let stop = CancellationToken::new();
                scheduled.stops.insert(key.clone(), stop.clone());
                self.spawn_loop(key.clone(), check.clone(), stop, None);
            }
        }

        if let Some(informer) = self.informer.clone() {
            tokio::spawn(async move {
                match check.describe() {
                    Ok(descriptor) => {
                        if let Err(e) = informer.create_or_update(&descriptor).await {
                            warn!(name = %key, error = %e, "syncing check upstream");
                        }
                    }
                    Err(e) => warn!(name = %key, error = %e, "describing check"),
                }
            });
        }
    }

    /// Stop the given check and remove it from the running configuration.
    /// A no-op for unknown keys.
    pub async fn del_check(&self, key: &str) {
        info!(name = %key, "deleting check");
        {
            let mut scheduled = self.scheduled.write().await;
            if let Some(stop) = scheduled.stops.remove(key) {
                info!(name = %key, "stopping check");
                stop.cancel();
            }
            scheduled.checks.remove(key);
        }
        self.status.delete(key).await;

        if let Some(informer) = self.informer.clone() {
            let key = key.to_string();
            tokio::spawn(async move {
                if let Err(e) = informer.delete_by_name(&key).await {
                    warn!(name = %key, error = %e, "deleting check upstream");
                }
            });
        }
    }

    /// The overall status of all checks.
    pub async fn get_status(&self) -> Statuses {
        self.status.snapshot().await
    }

    /// The status for a single check.
    pub async fn get_status_for(&self, key: &str) -> Option<Status> {
        self.status.get(key).await
    }

    /// Write a status entry directly; the follower-sync write path.
    pub async fn update_status_for(&self, key: &str, status: Status) {
        self.status.set(key, status).await;
    }

    /// Schedule all checks that are not already running. Loops run until the
    /// given token is cancelled or the check is deleted. Also starts the
    /// upstream refresher when an informer is configured.
    pub async fn run(self: &Arc<Self>, token: CancellationToken) {
        if !self.inform_only {
            let mut scheduled = self.scheduled.write().await;
            let pending: Vec<(String, DynCheck)> = scheduled
                .checks
                .iter()
                .filter(|(key, _)| !scheduled.stops.contains_key(*key))
                .map(|(key, check)| (key.clone(), check.clone()))
                .collect();
            for (key, check) in pending {
                let stop = CancellationToken::new();
                scheduled.stops.insert(key.clone(), stop.clone());
                self.spawn_loop(key, check, stop, Some(token.clone()));
            }
        }

        self.start_upstream_refresher(token);
    }

    /// Start all check loops with a freshly created root token.
    pub async fn start(self: &Arc<Self>) -> CancellationToken {
        let token = CancellationToken::new();
        self.run(token.clone()).await;
        token
    }

    /// Stop all check loops.
    pub async fn stop(&self) {
        let mut scheduled = self.scheduled.write().await;
        for (key, stop) in scheduled.stops.drain() {
            debug!(name = %key, "stopping check");
            stop.cancel();
        }
    }

    /// Run every current check exactly once, in parallel, and wait for all
    /// of them to complete.
    pub async fn check(self: &Arc<Self>) {
        let checks: Vec<(String, DynCheck)> = {
            let scheduled = self.scheduled.read().await;
            scheduled
                .checks
                .iter()
                .map(|(key, check)| (key.clone(), check.clone()))
                .collect()
        };

        join_all(checks.into_iter().map(|(key, check)| {
            let runner = Arc::clone(self);
            async move {
                tokio::time::sleep(check.initial_delay()).await;
                runner.run_check(&key, check.as_ref()).await;
            }
        }))
        .await;
    }

    /// `(all_failed, any_failed)` over the current status map.
    pub async fn summary(&self) -> (bool, bool) {
        self.status.evaluate().await
    }

    /// Returns a sync routine that pulls the status snapshot from the
    /// current leader and mirrors it into the local store.
    pub fn syncer(self: &Arc<Self>, use_tls: bool, port: u16) -> SyncFn {
        let runner = Arc::clone(self);
        let protocol = if use_tls { "https" } else { "http" };
        Arc::new(move |leader: String| -> BoxFuture<'static, ()> {
            let runner = Arc::clone(&runner);
            let url = format!("{protocol}://{leader}:{port}/");
            Box::pin(async move {
                match runner.sync_from(&url).await {
                    Ok(()) => info!("synced data from leader"),
                    Err(e) => warn!(error = %e, "failed to sync"),
                }
            })
        })
    }

    async fn sync_from(&self, url: &str) -> Result<()> {
        let response = self
            .sync_client
            .get(url)
            .send()
            .await
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?;
        let statuses: Statuses = response
            .json()
            .await
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?;

        for (name, status) in statuses {
            self.update_status_for(&name, status).await;
        }
        Ok(())
    }

    /// Re-push every known check to all upstreams.
    pub async fn refresh_upstreams(&self) {
        let Some(informer) = &self.informer else {
            return;
        };
        let checks: Vec<(String, DynCheck)> = {
            let scheduled = self.scheduled.read().await;
            scheduled
                .checks
                .iter()
                .map(|(key, check)| (key.clone(), check.clone()))
                .collect()
        };
        for (key, check) in checks {
            match check.describe() {
                Ok(descriptor) => {
                    if let Err(e) = informer.replace(&descriptor).await {
                        warn!(name = %key, error = %e, "syncing check upstream");
                    }
                }
                Err(e) => warn!(name = %key, error = %e, "describing check"),
            }
        }
    }

    fn start_upstream_refresher(self: &Arc<Self>, token: CancellationToken) {
        if self.informer.is_none() || self.refresher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting upstream refresher");
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(runner.upstream_refresh);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        info!("stopping upstream refresher");
                        return;
                    }
                    _ = ticker.tick() => runner.refresh_upstreams().await,
                }
            }
        });
    }

    /// Execute the check on its configured cadence until the stop handle or
    /// the enclosing token fires.
    fn spawn_loop(
        self: &Arc<Self>,
        key: String,
        check: DynCheck,
        stop: CancellationToken,
        parent: Option<CancellationToken>,
    ) {
        let runner = Arc::clone(self);
        info!(name = %key, "starting check");
        tokio::spawn(async move {
            // A stand-in that never fires keeps the select uniform.
            let parent = parent.unwrap_or_default();

            let delay = check.initial_delay();
            if !delay.is_zero() {
                tokio::select! {
                    () = stop.cancelled() => return,
                    () = parent.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
            }

            runner.run_check(&key, check.as_ref()).await;

            let mut ticker = interval(check.interval());
            // A tick delivered while an execution is still running is
            // dropped, not queued.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = stop.cancelled() => {
                        info!(name = %key, "got quit signal, stopping check");
                        return;
                    }
                    () = parent.cancelled() => {
                        info!(name = %key, "stopping check");
                        return;
                    }
                    _ = ticker.tick() => runner.run_check(&key, check.as_ref()).await,
                }
            }
        });
    }

    /// Execute one check and record the resulting status. Failures never
    /// terminate the loop.
    async fn run_check(&self, key: &str, check: &dyn Check) {
        let mut status = self.status.get(key).await.unwrap_or_default();
        status.error.clear();
        status.timestamp = Utc::now();

        let started = Instant::now();
        let result = check.execute().await;
        status.duration = started.elapsed();

        match result {
            Ok(()) => {
                status.ok = true;
                status.contiguous_failures = 0;
                debug!(name = %key, healthy = true, "check status");
            }
            Err(e) => {
                status.ok = false;
                status.error = e.to_string();
                if status.contiguous_failures == 0 {
                    status.time_of_first_failure = Some(status.timestamp);
                }
                status.contiguous_failures += 1;
                warn!(name = %key, healthy = false, error = %status.error, "check status");
            }
        }

        self.status.set(key, status).await;
    }

    /// Keys of all configured checks.
    pub async fn check_keys(&self) -> Vec<String> {
        let scheduled = self.scheduled.read().await;
        let mut keys: Vec<String> = scheduled.checks.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys of all checks with a running loop.
    pub async fn scheduled_keys(&self) -> Vec<String> {
        let scheduled = self.scheduled.read().await;
        let mut keys: Vec<String> = scheduled.stops.keys().cloned().collect();
        keys.sort();
        keys
    }
}
