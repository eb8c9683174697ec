use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use checker_api::routes::AppState;
use checker_api::server;
use checker_cluster::election::{LeaderElector, RunFn};
use checker_cluster::ingress::run_ingress_watcher;
use checker_core::Runner;

use crate::config::AppConfig;
use crate::ServeArgs;

/// Run as a service: schedule the checks (directly, or under leader
/// election) and serve the HTTP API until a shutdown signal arrives.
pub async fn run(cfg: AppConfig, args: ServeArgs) -> Result<()> {
    let runner = Runner::new_from_config(&cfg.checks, !args.k8s_leader_election).await?;
    let root = CancellationToken::new();

    if args.k8s_leader_election {
        let elector =
            LeaderElector::new(&args.leader_election_id, &args.leader_election_ns).await?;
        info!(id = %elector.id, "running in HA mode with leader election");

        let run_fn: RunFn = {
            let runner = runner.clone();
            let watch_ingresses = args.watch_ingresses;
            Box::new(
                move |token: CancellationToken| -> futures::future::BoxFuture<'static, ()> {
                    Box::pin(async move {
                        runner.run(token.clone()).await;
                        if watch_ingresses {
                            match kube::Client::try_default().await {
                                Ok(client) => {
                                    tokio::spawn(run_ingress_watcher(client, runner, token));
                                }
                                Err(e) => warn!(error = %e, "failed to start ingress watcher"),
                            }
                        }
                    })
                },
            )
        };

        let sync = runner.syncer(false, cfg.http.port);
        let election_token = root.clone();
        tokio::spawn(async move {
            elector.run(election_token, run_fn, sync).await;
        });
    } else {
        runner.run(root.clone()).await;
        if args.watch_ingresses {
            let client = kube::Client::try_default().await?;
            tokio::spawn(run_ingress_watcher(client, runner.clone(), root.clone()));
        }
    }

    let state = AppState::with_status_codes(
        runner.clone(),
        args.failed_status_code,
        args.degraded_status_code,
        cfg.http.pretty_json,
    );
    let router = checker_api::router(state, &cfg.http.auth);
    server::serve(&cfg.http, router, server::shutdown_signal()).await?;

    // Wind down the check loops before exiting.
    root.cancel();
    runner.stop().await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}
