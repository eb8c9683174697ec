mod check;
mod config;
mod serve;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use checker_core::logging;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "synthetic-checker",
    about = "A service to run synthetic checks and report their results",
    version
)]
struct Cli {
    /// Config file (default is ./checks.yaml, $HOME/checks.yaml or
    /// /etc/config/checks.yaml)
    #[arg(short = 'c', long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run as a service
    #[command(visible_aliases = ["run", "start"])]
    Serve(ServeArgs),
    /// Run the checks once and get an exit code
    #[command(visible_alias = "exec")]
    Check(CheckArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// HTTP status code to return when all checks are failed
    #[arg(short = 'F', long = "failed-status-code", default_value_t = 200)]
    pub failed_status_code: u16,

    /// HTTP status code to return when any check is failed
    #[arg(short = 'D', long = "degraded-status-code", default_value_t = 200)]
    pub degraded_status_code: u16,

    /// Enable leader election, only works when running in k8s
    #[arg(long = "k8s-leader-election")]
    pub k8s_leader_election: bool,

    /// Set the leader election ID, defaults to POD_NAME or hostname
    #[arg(long = "leader-election-id", default_value = "")]
    pub leader_election_id: String,

    /// Set the leader election namespace, defaults to the current namespace
    #[arg(long = "leader-election-ns", default_value = "")]
    pub leader_election_ns: String,

    /// Automatically set up checks for k8s ingresses, only works when
    /// running in k8s
    #[arg(short = 'w', long = "watch-ingresses")]
    pub watch_ingresses: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Number of times to retry on failure
    #[arg(short = 'r', long, default_value_t = 0)]
    pub retries: u32,

    /// Pretty print the check status
    #[arg(short = 'p', long = "pretty-print", default_value_t = true)]
    pub pretty_print: bool,

    /// Disable pretty printing
    #[arg(short = 'P', long)]
    pub plain: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = AppConfig::load(cli.config.as_deref())?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Command::Serve(args) => serve::run(cfg, args).await,
        Command::Check(args) => check::run(cfg, args).await,
    }
}
