//! LiveOps Sim: runs a bandit allocation simulation for one campaign scenario.
//!
//! Loads a JSON scenario into the in-memory store, runs the campaign through
//! the simulation service and prints the final result as JSON.

use anyhow::Context;
use clap::Parser;
use liveops_core::config::AppConfig;
use liveops_management::{LiveOpsStore, Scenario, SimulationRunner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "liveops-sim")]
#[command(about = "Bandit allocation simulator for LiveOps campaigns")]
#[command(version)]
struct Cli {
    /// Scenario file (campaign, variants, segments, mix, modifiers)
    #[arg(long, short)]
    scenario: PathBuf,

    /// Number of impressions to simulate (overrides config)
    #[arg(long, short = 'n', env = "LIVEOPS__SIMULATION__DEFAULT_IMPRESSIONS")]
    impressions: Option<i64>,

    /// Random seed (overrides config)
    #[arg(long, env = "LIVEOPS__SIMULATION__DEFAULT_SEED")]
    seed: Option<u64>,

    /// Impressions per published batch (overrides config)
    #[arg(long, env = "LIVEOPS__SIMULATION__BATCH_SIZE")]
    batch_size: Option<u64>,

    /// Also write the impression log to this file
    #[arg(long)]
    impressions_out: Option<PathBuf>,

    /// Seconds between progress log lines
    #[arg(long, default_value_t = 1)]
    progress_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "liveops_sim=info,liveops_management=info,liveops_rl_engine=info".into()
            }),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(seed) = cli.seed {
        config.simulation.default_seed = seed;
    }
    if let Some(batch_size) = cli.batch_size {
        config.simulation.batch_size = batch_size;
    }
    let impressions = cli.impressions.unwrap_or(config.simulation.default_impressions);

    info!(
        algorithm = ?config.simulation.algorithm,
        batch_size = config.simulation.batch_size,
        seed = config.simulation.default_seed,
        impressions,
        "Configuration loaded"
    );

    let raw = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading scenario {}", cli.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("parsing scenario {}", cli.scenario.display()))?;

    let store = Arc::new(LiveOpsStore::new(config.store.clone()));
    let campaign_id = store.load_scenario(scenario)?;
    let runner = Arc::new(SimulationRunner::new(Arc::clone(&store), &config));

    let handle = runner.run_simulation(campaign_id, impressions, None)?;
    info!(campaign_id, run_id = %handle.run_id, "Simulation triggered");

    let canceller = Arc::clone(&runner);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(campaign_id, "Interrupt received, stopping simulation");
            canceller.cancel(campaign_id);
        }
    });

    let progress_store = Arc::clone(&store);
    let period = Duration::from_secs(cli.progress_secs.max(1));
    let progress = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Ok(snapshot) = progress_store.get_simulation_result(campaign_id) {
                info!(
                    campaign_id,
                    simulated = snapshot.total_impressions,
                    regret_mab = snapshot.cumulative_regret_mab,
                    "Simulation progress"
                );
            }
        }
    });

    let result = handle.wait().await;
    progress.abort();
    interrupt.abort();
    let result = result?;

    if let Some(path) = &cli.impressions_out {
        let impressions = store.get_impressions(campaign_id)?;
        std::fs::write(path, serde_json::to_vec_pretty(&impressions)?)
            .with_context(|| format!("writing impressions to {}", path.display()))?;
        info!(path = %path.display(), count = impressions.len(), "Impression log written");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
