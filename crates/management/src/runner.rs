//! Simulation service: triggers runs against stored campaigns, executes them
//! in batches on the blocking pool, and publishes progress to the store.

use crate::models::RunRecord;
use crate::store::LiveOpsStore;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use liveops_core::types::{CampaignId, SimulationResult};
use liveops_core::{AppConfig, LiveOpsError, LiveOpsResult};
use liveops_rl_engine::{EngineSettings, SimulationDriver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: Uuid,
    keep_going: Arc<AtomicBool>,
}

/// A campaign's active-run slot, released on drop.
struct RunSlot {
    active: Arc<DashMap<CampaignId, ActiveRun>>,
    campaign_id: CampaignId,
    run: ActiveRun,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        let run_id = self.run.run_id;
        self.active
            .remove_if(&self.campaign_id, |_, active| active.run_id == run_id);
    }
}

/// Handle to a run executing in the background.
pub struct RunHandle {
    pub run_id: Uuid,
    pub campaign_id: CampaignId,
    join: JoinHandle<LiveOpsResult<SimulationResult>>,
}

impl RunHandle {
    /// Wait for the run to finish and return its final snapshot.
    pub async fn wait(self) -> LiveOpsResult<SimulationResult> {
        self.join
            .await
            .map_err(|e| LiveOpsError::Internal(anyhow::Error::new(e).context("simulation task failed")))?
    }
}

pub struct SimulationRunner {
    store: Arc<LiveOpsStore>,
    settings: EngineSettings,
    batch_size: u64,
    default_seed: u64,
    active: Arc<DashMap<CampaignId, ActiveRun>>,
}

impl SimulationRunner {
    pub fn new(store: Arc<LiveOpsStore>, config: &AppConfig) -> Self {
        Self {
            store,
            settings: EngineSettings::from(config),
            batch_size: config.simulation.batch_size.max(1),
            default_seed: config.simulation.default_seed,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<LiveOpsStore> {
        &self.store
    }

    pub fn is_running(&self, campaign_id: CampaignId) -> bool {
        self.active.contains_key(&campaign_id)
    }

    /// Ask a running simulation to stop after the impression in flight. The
    /// partial snapshot stays readable with `completed = false`.
    pub fn cancel(&self, campaign_id: CampaignId) -> bool {
        match self.active.get(&campaign_id) {
            Some(run) => {
                run.keep_going.store(false, Ordering::SeqCst);
                info!(campaign_id, run_id = %run.run_id, "Simulation cancellation requested");
                metrics::counter!("liveops.simulations.cancelled").increment(1);
                true
            }
            None => false,
        }
    }

    /// Start a run in the background. A duplicate trigger while the campaign
    /// is still running fails with `AlreadyRunning`; configuration problems
    /// surface here, before any impression is simulated.
    pub fn run_simulation(
        &self,
        campaign_id: CampaignId,
        impressions_count: i64,
        seed: Option<u64>,
    ) -> LiveOpsResult<RunHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LiveOpsError::Internal(anyhow::Error::new(e).context("no async runtime")))?;
        let (driver, slot) = self.prepare(campaign_id, impressions_count, seed)?;
        let run_id = slot.run.run_id;
        let store = Arc::clone(&self.store);
        let batch_size = self.batch_size;
        let join = runtime.spawn_blocking(move || execute(&store, driver, slot, batch_size));
        Ok(RunHandle {
            run_id,
            campaign_id,
            join,
        })
    }

    /// Run on the calling thread until done.
    pub fn run_to_completion(
        &self,
        campaign_id: CampaignId,
        impressions_count: i64,
        seed: Option<u64>,
    ) -> LiveOpsResult<SimulationResult> {
        let (driver, slot) = self.prepare(campaign_id, impressions_count, seed)?;
        execute(&self.store, driver, slot, self.batch_size)
    }

    fn claim(&self, campaign_id: CampaignId) -> LiveOpsResult<RunSlot> {
        let run = ActiveRun {
            run_id: Uuid::new_v4(),
            keep_going: Arc::new(AtomicBool::new(true)),
        };
        match self.active.entry(campaign_id) {
            Entry::Occupied(_) => {
                warn!(campaign_id, "Duplicate simulation trigger rejected");
                metrics::counter!("liveops.simulations.rejected").increment(1);
                Err(LiveOpsError::AlreadyRunning(campaign_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
                Ok(RunSlot {
                    active: Arc::clone(&self.active),
                    campaign_id,
                    run,
                })
            }
        }
    }

    fn prepare(
        &self,
        campaign_id: CampaignId,
        impressions_count: i64,
        seed: Option<u64>,
    ) -> LiveOpsResult<(SimulationDriver, RunSlot)> {
        let max = self.store.config().max_impressions_per_run;
        if impressions_count > max {
            return Err(LiveOpsError::invalid(format!(
                "impressions_count {impressions_count} exceeds the per-run limit of {max}"
            )));
        }
        let slot = self.claim(campaign_id)?;
        let seed = seed.unwrap_or(self.default_seed);

        let mut plan = self.store.plan_for(campaign_id, self.settings.clone())?;
        let started_at = Utc::now();
        plan.campaign.start_time = Some(started_at);
        let driver = SimulationDriver::new(&plan, impressions_count, seed)?;

        self.store.mark_started(campaign_id, started_at)?;
        let record = RunRecord {
            run_id: slot.run.run_id,
            campaign_id,
            impressions_count,
            seed,
            started_at,
            finished_at: None,
        };
        self.store.begin_output(record, driver.snapshot());

        metrics::counter!("liveops.simulations.started").increment(1);
        info!(
            campaign_id,
            run_id = %slot.run.run_id,
            impressions_count,
            seed,
            "Simulation started"
        );
        Ok((driver, slot))
    }
}

/// Drive a prepared run batch by batch, publishing after each batch.
fn execute(
    store: &LiveOpsStore,
    mut driver: SimulationDriver,
    slot: RunSlot,
    batch_size: u64,
) -> LiveOpsResult<SimulationResult> {
    let campaign_id = slot.campaign_id;
    let output = store.get_run_output(campaign_id)?;
    let keep_going = Arc::clone(&slot.run.keep_going);

    let outcome = loop {
        let advanced = match driver.advance(batch_size, || keep_going.load(Ordering::SeqCst)) {
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        metrics::counter!("liveops.impressions.simulated").increment(advanced);
        LiveOpsStore::publish(&output, driver.drain_impressions(), driver.snapshot());
        debug!(campaign_id, simulated = driver.simulated(), "Batch published");

        if driver.is_finished() || !keep_going.load(Ordering::SeqCst) {
            break Ok(driver.snapshot());
        }
    };

    let finished_at = Utc::now();
    store.mark_finished(campaign_id, finished_at);
    output.write().record.finished_at = Some(finished_at);
    drop(slot);

    match &outcome {
        Ok(result) if result.completed => {
            metrics::counter!("liveops.simulations.completed").increment(1);
            info!(
                campaign_id,
                impressions = result.total_impressions,
                regret_mab = result.cumulative_regret_mab,
                regret_uniform = result.cumulative_regret_uniform,
                "Simulation completed"
            );
        }
        Ok(result) => {
            info!(
                campaign_id,
                impressions = result.total_impressions,
                "Simulation halted before completion"
            );
        }
        Err(e) => {
            metrics::counter!("liveops.simulations.failed").increment(1);
            error!(campaign_id, error = %e, "Simulation failed");
        }
    }
    outcome
}
