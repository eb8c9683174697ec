use std::time::Duration;

use anyhow::Result;

use checker_core::Runner;

use crate::config::AppConfig;
use crate::CheckArgs;

/// Retry backoff doubles per attempt but never exceeds this cap.
const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Run every check once (retrying failed rounds with exponential backoff),
/// print the resulting status map and exit non-zero when anything failed.
pub async fn run(cfg: AppConfig, args: CheckArgs) -> Result<()> {
    let runner = Runner::new_from_config(&cfg.checks, false).await?;

    let attempts = args.retries + 1;
    let mut any_failed = false;
    for remaining in (1..=attempts).rev() {
        runner.check().await;
        (_, any_failed) = runner.summary().await;
        if !any_failed {
            break;
        }
        if remaining > 1 {
            let backoff = backoff_secs(attempts - remaining);
            eprintln!("Error: some checks have failed, retrying in {backoff}s");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        }
    }

    let status = runner.get_status().await;
    let output = if args.pretty_print && !args.plain {
        serde_json::to_string_pretty(&status)?
    } else {
        serde_json::to_string(&status)?
    };
    println!("{output}");

    if any_failed {
        anyhow::bail!("some checks have failed");
    }
    Ok(())
}

fn backoff_secs(round: u32) -> u64 {
    2_u64.saturating_pow(round).min(MAX_RETRY_BACKOFF_SECS)
}
