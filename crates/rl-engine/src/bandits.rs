//! Plain multi-armed bandit: Thompson Sampling or UCB1 over a fixed variant set.

use crate::context::Opportunity;
use crate::policy::{BanditPolicy, PendingChoice};
use liveops_core::config::BanditAlgorithm;
use liveops_core::types::VariantId;
use liveops_core::{LiveOpsError, LiveOpsResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmStats {
    pub variant_id: VariantId,
    pub pulls: u64,
    pub successes: u64,
    pub conversion_rate: f64,
    pub confidence_interval_lower: f64,
    pub confidence_interval_upper: f64,
    pub traffic_allocation: f64,
    /// Posterior mean of Beta(1 + successes, 1 + failures).
    pub estimated_value: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct ArmState {
    pulls: u64,
    successes: u64,
}

impl ArmState {
    fn alpha(&self) -> f64 {
        1.0 + self.successes as f64
    }

    fn beta(&self) -> f64 {
        1.0 + (self.pulls - self.successes) as f64
    }

    fn mean(&self) -> f64 {
        if self.pulls > 0 {
            self.successes as f64 / self.pulls as f64
        } else {
            0.0
        }
    }
}

/// Arms are kept in ascending variant id order; that order drives both the
/// cold-start sequence and tie-breaking.
#[derive(Debug, Clone)]
pub struct MabPolicy {
    algorithm: BanditAlgorithm,
    arms: Vec<VariantId>,
    state: Vec<ArmState>,
    rng: StdRng,
    pending: PendingChoice,
}

impl MabPolicy {
    pub fn new(
        mut arms: Vec<VariantId>,
        algorithm: BanditAlgorithm,
        seed: u64,
    ) -> LiveOpsResult<Self> {
        if arms.is_empty() {
            return Err(LiveOpsError::config("bandit needs at least one variant"));
        }
        arms.sort_unstable();
        arms.dedup();
        let state = vec![ArmState::default(); arms.len()];
        Ok(Self {
            algorithm,
            arms,
            state,
            rng: StdRng::seed_from_u64(seed),
            pending: PendingChoice::default(),
        })
    }

    pub fn arms(&self) -> &[VariantId] {
        &self.arms
    }

    pub fn total_pulls(&self) -> u64 {
        self.state.iter().map(|s| s.pulls).sum()
    }

    fn select_index(&mut self) -> usize {
        if let Some(untried) = self.state.iter().position(|s| s.pulls == 0) {
            return untried;
        }
        match self.algorithm {
            BanditAlgorithm::ThompsonSampling => self.thompson_sampling(),
            BanditAlgorithm::Ucb1 => self.ucb1(),
        }
    }

    fn thompson_sampling(&mut self) -> usize {
        let mut best_sample = f64::NEG_INFINITY;
        let mut best = 0;

        for (i, state) in self.state.iter().enumerate() {
            let sample = match Beta::new(state.alpha(), state.beta()) {
                Ok(dist) => dist.sample(&mut self.rng),
                Err(_) => state.mean(),
            };
            if sample > best_sample {
                best_sample = sample;
                best = i;
            }
        }

        best
    }

    fn ucb1(&self) -> usize {
        let log_total = (self.total_pulls() as f64).ln();
        let mut best_score = f64::NEG_INFINITY;
        let mut best = 0;

        for (i, state) in self.state.iter().enumerate() {
            let exploration = (2.0 * log_total / state.pulls as f64).sqrt();
            let score = state.mean() + exploration;
            if score > best_score {
                best_score = score;
                best = i;
            }
        }

        best
    }

    pub fn stats(&self) -> Vec<ArmStats> {
        let total = self.total_pulls();

        self.arms
            .iter()
            .zip(self.state.iter())
            .map(|(&variant_id, s)| {
                let rate = s.mean();
                let ci_width = if s.pulls > 0 {
                    1.96 * (rate * (1.0 - rate) / s.pulls as f64).sqrt()
                } else {
                    0.5
                };
                ArmStats {
                    variant_id,
                    pulls: s.pulls,
                    successes: s.successes,
                    conversion_rate: rate,
                    confidence_interval_lower: (rate - ci_width).max(0.0),
                    confidence_interval_upper: (rate + ci_width).min(1.0),
                    traffic_allocation: if total > 0 {
                        s.pulls as f64 / total as f64
                    } else {
                        1.0 / self.arms.len() as f64
                    },
                    estimated_value: s.alpha() / (s.alpha() + s.beta()),
                }
            })
            .collect()
    }
}

impl BanditPolicy for MabPolicy {
    fn choose(&mut self, _opportunity: &Opportunity) -> LiveOpsResult<VariantId> {
        let index = self.select_index();
        let variant_id = self.arms[index];
        self.pending.arm(variant_id);
        Ok(variant_id)
    }

    fn update(
        &mut self,
        variant_id: VariantId,
        clicked: bool,
        _opportunity: &Opportunity,
    ) -> LiveOpsResult<()> {
        self.pending.settle(variant_id)?;
        let index = self
            .arms
            .binary_search(&variant_id)
            .map_err(|_| LiveOpsError::InvalidPolicyUse(format!("unknown variant {variant_id}")))?;
        let state = &mut self.state[index];
        state.pulls += 1;
        if clicked {
            state.successes += 1;
        }
        Ok(())
    }
}
