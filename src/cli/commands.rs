//! CLI command definitions.
//!
//! `run` submits a match request against the local cluster and prints the
//! result. `orchestrate` is the execution-stage entry point: it reads the
//! mounted configuration artifact, drives the match loop, and prints the
//! structured result as the final stdout line for the lifecycle engine to
//! extract.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cluster::DockerCluster;
use crate::config::ExecutorConfig;
use crate::job::MatchConfig;
use crate::orchestrator::MatchOrchestrator;
use crate::service::MatchService;
use crate::types::{HealthStatus, MatchRequest};

/// Match execution engine for pairwise RL agent competitions.
#[derive(Parser)]
#[command(name = "arena-executor")]
#[command(about = "Run pairwise RL agent matches in isolated execution units")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Submit one match request and wait for its result.
    Run(RunArgs),

    /// In-unit entry point: run the match loop from a mounted
    /// configuration artifact and emit the result line.
    Orchestrate(OrchestrateArgs),

    /// Print a process-level health snapshot.
    Health,
}

/// Arguments for `arena-executor run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to a JSON MatchRequest file.
    #[arg(short, long)]
    pub request: PathBuf,

    /// Overrides the request's match id. A fresh id is generated when the
    /// file carries none.
    #[arg(long)]
    pub match_id: Option<String>,
}

/// Arguments for `arena-executor orchestrate`.
#[derive(Parser, Debug)]
pub struct OrchestrateArgs {
    /// Path to the mounted match configuration JSON.
    #[arg(long)]
    pub config: PathBuf,

    /// Root of the mounted agent code area.
    #[arg(long, default_value = "/agent-code")]
    pub code_dir: PathBuf,

    /// Writable replay area.
    #[arg(long, default_value = "/replays")]
    pub replay_dir: PathBuf,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the CLI with parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Orchestrate(args) => orchestrate_command(args).await,
        Commands::Health => health_command(),
    }
}

async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let config = ExecutorConfig::from_env()?;
    if let Err(e) = crate::metrics::init_metrics() {
        warn!(error = %e, "Metrics initialization failed");
    }

    let raw = std::fs::read_to_string(&args.request)?;
    let mut request: MatchRequest = serde_json::from_str(&raw)?;
    if let Some(id) = args.match_id {
        request.match_id = id;
    }
    if request.match_id.is_empty() {
        request.match_id = Uuid::new_v4().to_string();
    }
    if request.timeout_sec == 0 {
        request.timeout_sec = config.match_timeout_sec;
    }

    info!(match_id = %request.match_id, environment = %request.environment, "Submitting match");

    let cluster = Arc::new(DockerCluster::new(&config)?);
    let service = MatchService::new(config, cluster);
    let result = service.run_match(request).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn orchestrate_command(args: OrchestrateArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.config)?;
    let config: MatchConfig = serde_json::from_str(&raw)?;

    let orchestrator = MatchOrchestrator::new(config, args.code_dir, args.replay_dir);
    let result = orchestrator.run().await;

    // The result must be the last line on stdout: the lifecycle engine
    // extracts it from the captured unit output.
    println!("{}", serde_json::to_string(&result)?);

    if result.is_success() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn health_command() -> anyhow::Result<()> {
    let health = HealthStatus {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_matches: 0,
    };
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}
