//! Simulation driver: feeds a stream of impression opportunities through a
//! bandit policy and the reward model, accumulating regret as it goes.
//!
//! Impressions are processed strictly in order: each `update` lands before the
//! next `choose`. The driver is resumable: callers can advance it in batches and
//! take a consistent snapshot between any two impressions.

use crate::bandits::MabPolicy;
use crate::context::{ContextSampler, Opportunity};
use crate::contextual::LinUcbPolicy;
use crate::policy::{BanditPolicy, Policy};
use crate::regret::RegretAccumulator;
use crate::reward::RewardModel;
use crate::segmented::{SegmentSampler, SegmentedPolicy};
use chrono::{DateTime, Duration, Utc};
use liveops_core::config::{AppConfig, BanditAlgorithm, ContextDistribution, LinkFunction};
use liveops_core::types::{
    Campaign, CampaignType, Impression, Segment, SegmentMix, SegmentVariantModifier,
    SimulationResult, Variant, VariantId,
};
use liveops_core::{LiveOpsError, LiveOpsResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Separates the policy's random stream from the environment's.
const POLICY_SEED_SALT: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub algorithm: BanditAlgorithm,
    pub linucb_alpha: f64,
    pub linucb_lambda: f64,
    pub link: LinkFunction,
    pub distribution: ContextDistribution,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            algorithm: BanditAlgorithm::default(),
            linucb_alpha: 1.0,
            linucb_lambda: 1.0,
            link: LinkFunction::default(),
            distribution: ContextDistribution::default(),
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            algorithm: config.simulation.algorithm,
            linucb_alpha: config.contextual.alpha,
            linucb_lambda: config.contextual.lambda,
            link: config.contextual.link,
            distribution: config.contextual.distribution,
        }
    }
}

/// Everything a run needs, resolved from stored rows.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub campaign: Campaign,
    pub variants: Vec<Variant>,
    pub segments: Vec<Segment>,
    pub segment_mix: Option<SegmentMix>,
    pub modifiers: Vec<SegmentVariantModifier>,
    pub settings: EngineSettings,
}

impl SimulationPlan {
    pub fn new(campaign: Campaign, variants: Vec<Variant>) -> Self {
        Self {
            campaign,
            variants,
            segments: Vec::new(),
            segment_mix: None,
            modifiers: Vec::new(),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_segments(
        mut self,
        mix: SegmentMix,
        segments: Vec<Segment>,
        modifiers: Vec<SegmentVariantModifier>,
    ) -> Self {
        self.segment_mix = Some(mix);
        self.segments = segments;
        self.modifiers = modifiers;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }
}

pub struct SimulationDriver {
    campaign_type: CampaignType,
    reward: RewardModel,
    policy: Policy,
    regret: RegretAccumulator,
    segments: Option<SegmentSampler>,
    contexts: ContextSampler,
    rng: StdRng,
    impressions: Vec<Impression>,
    target: u64,
    start_time: DateTime<Utc>,
    span_ms: i64,
}

impl SimulationDriver {
    /// Validates the whole plan up front; a bad configuration fails here,
    /// before any impression is simulated.
    pub fn new(plan: &SimulationPlan, impressions_count: i64, seed: u64) -> LiveOpsResult<Self> {
        if impressions_count <= 0 {
            return Err(LiveOpsError::invalid(format!(
                "impressions_count must be positive, got {impressions_count}"
            )));
        }
        let target = impressions_count as u64;
        let campaign = &plan.campaign;
        campaign.validate()?;

        let settings = &plan.settings;
        let mut reward = RewardModel::new(plan.variants.clone())?;
        let arms = reward.variant_ids();
        let policy_seed = seed ^ POLICY_SEED_SALT;

        let (policy, segments) = match campaign.campaign_type {
            CampaignType::Mab => (
                Policy::Mab(MabPolicy::new(arms.clone(), settings.algorithm, policy_seed)?),
                None,
            ),
            CampaignType::SegmentedMab => {
                let mix = plan.segment_mix.as_ref().ok_or_else(|| {
                    LiveOpsError::config(format!(
                        "campaign {} is SEGMENTED_MAB but has no segment mix",
                        campaign.id
                    ))
                })?;
                let sampler = SegmentSampler::new(mix)?;
                reward = reward.with_segments(&plan.segments, &plan.modifiers)?;
                let policy =
                    SegmentedPolicy::new(sampler.len(), arms.clone(), settings.algorithm, policy_seed)?;
                (Policy::Segmented(policy), Some(sampler))
            }
            CampaignType::ContextualMab => {
                reward = reward.contextual(Arc::new(settings.link))?;
                let policy =
                    LinUcbPolicy::new(arms.clone(), settings.linucb_alpha, settings.linucb_lambda)?;
                (Policy::Contextual(policy), None)
            }
        };

        let segment_count = segments.as_ref().map_or(0, SegmentSampler::len);
        let start_time = campaign.start_time.unwrap_or_else(Utc::now);
        let span_ms = campaign.duration().num_milliseconds();

        info!(
            campaign_id = campaign.id,
            campaign_type = ?campaign.campaign_type,
            variants = arms.len(),
            segments = segment_count,
            impressions = target,
            seed,
            "Simulation run prepared"
        );

        Ok(Self {
            campaign_type: campaign.campaign_type,
            regret: RegretAccumulator::new(campaign.campaign_type, arms, segment_count),
            reward,
            policy,
            segments,
            contexts: ContextSampler::new(settings.distribution),
            rng: StdRng::seed_from_u64(seed),
            impressions: Vec::new(),
            target,
            start_time,
            span_ms,
        })
    }

    pub fn campaign_type(&self) -> CampaignType {
        self.campaign_type
    }

    pub fn simulated(&self) -> u64 {
        self.regret.total_impressions()
    }

    pub fn remaining(&self) -> u64 {
        self.target - self.simulated()
    }

    pub fn is_finished(&self) -> bool {
        self.simulated() >= self.target
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Impression `position` of N lands `duration * position / N` after the start.
    fn timestamp_at(&self, position: u64) -> DateTime<Utc> {
        let offset = i128::from(self.span_ms) * i128::from(position) / i128::from(self.target);
        self.start_time + Duration::milliseconds(offset as i64)
    }

    fn next_opportunity(&mut self) -> Opportunity {
        match (self.campaign_type, &self.segments) {
            (CampaignType::SegmentedMab, Some(sampler)) => sampler.sample(&mut self.rng),
            (CampaignType::ContextualMab, _) => Opportunity::Context(self.contexts.sample(&mut self.rng)),
            _ => Opportunity::Plain,
        }
    }

    /// Simulate one impression. Returns `None` once the target is reached.
    pub fn step(&mut self) -> LiveOpsResult<Option<&Impression>> {
        if self.is_finished() {
            return Ok(None);
        }
        let opportunity = self.next_opportunity();
        let variant_id = self.policy.choose(&opportunity)?;
        let index = self.reward.index_of(variant_id).ok_or_else(|| {
            LiveOpsError::InvalidPolicyUse(format!("policy chose unknown variant {variant_id}"))
        })?;
        let clicked = self.reward.sample_outcome(index, &opportunity, &mut self.rng);

        let impression = Impression {
            timestamp: self.timestamp_at(self.simulated() + 1),
            variant_id,
            segment_id: opportunity.segment_id(),
            clicked,
            context: opportunity.features().map(<[f64]>::to_vec),
        };

        self.policy.update(variant_id, clicked, &opportunity)?;
        let ctrs = self.reward.effective_ctrs(&opportunity);
        self.regret.record(&ctrs, index, opportunity.segment_index());
        self.impressions.push(impression);

        Ok(self.impressions.last())
    }

    /// Advance by at most `max_steps` impressions, polling `should_continue`
    /// before each one. Returns how many were simulated.
    pub fn advance(
        &mut self,
        max_steps: u64,
        mut should_continue: impl FnMut() -> bool,
    ) -> LiveOpsResult<u64> {
        let mut done = 0;
        while done < max_steps && !self.is_finished() {
            if !should_continue() {
                debug!(simulated = self.simulated(), "Simulation halted by caller");
                break;
            }
            self.step()?;
            done += 1;
        }
        Ok(done)
    }

    /// Impressions simulated since the last drain, oldest first.
    pub fn drain_impressions(&mut self) -> Vec<Impression> {
        std::mem::take(&mut self.impressions)
    }

    pub fn impressions(&self) -> &[Impression] {
        &self.impressions
    }

    pub fn true_ctrs(&self) -> BTreeMap<VariantId, f64> {
        self.reward
            .variants()
            .iter()
            .map(|v| (v.id, v.base_ctr))
            .collect()
    }

    pub fn snapshot(&self) -> SimulationResult {
        self.regret.snapshot(self.true_ctrs(), self.is_finished())
    }
}

/// Run a campaign to completion.
pub fn run(plan: &SimulationPlan, impressions_count: i64, seed: u64) -> LiveOpsResult<SimulationResult> {
    run_until(plan, impressions_count, seed, || true)
}

/// Run until the target is reached or `should_continue` returns false. A halted
/// run returns its partial, internally consistent result with `completed = false`.
pub fn run_until(
    plan: &SimulationPlan,
    impressions_count: i64,
    seed: u64,
    should_continue: impl FnMut() -> bool,
) -> LiveOpsResult<SimulationResult> {
    let mut driver = SimulationDriver::new(plan, impressions_count, seed)?;
    let target = driver.remaining();
    driver.advance(target, should_continue)?;
    let result = driver.snapshot();
    info!(
        campaign_id = plan.campaign.id,
        impressions = result.total_impressions,
        regret_mab = result.cumulative_regret_mab,
        regret_uniform = result.cumulative_regret_uniform,
        completed = result.completed,
        "Simulation run finished"
    );
    Ok(result)
}
