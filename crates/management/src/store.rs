//! In-memory LiveOps store backed by DashMap.
//!
//! Holds the campaign, variant, segment and mix rows a simulation run reads,
//! and the progressively published output of each campaign's latest run.

use crate::models::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use liveops_core::config::StoreConfig;
use liveops_core::types::{
    validate_ctr, validate_weights, Campaign, CampaignId, CampaignStatus, Impression, Segment,
    SegmentId, SegmentMix, SegmentMixId, SegmentVariantModifier, SimulationResult, Variant,
    VariantId,
};
use liveops_core::{LiveOpsError, LiveOpsResult};
use liveops_rl_engine::{EngineSettings, SimulationPlan};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Thread-safe store for the simulation data model.
pub struct LiveOpsStore {
    config: StoreConfig,
    variants: DashMap<VariantId, Variant>,
    segments: DashMap<SegmentId, Segment>,
    segment_mixes: DashMap<SegmentMixId, SegmentMix>,
    campaigns: DashMap<CampaignId, Campaign>,
    modifiers: DashMap<CampaignId, BTreeMap<(SegmentId, VariantId), f64>>,
    outputs: DashMap<CampaignId, Arc<RwLock<RunOutput>>>,
    /// Serialises campaign starts against writes that are refused once a
    /// campaign has started.
    lifecycle: Mutex<()>,
}

impl LiveOpsStore {
    pub fn new(config: StoreConfig) -> Self {
        info!(
            max_impressions_per_run = config.max_impressions_per_run,
            "LiveOps store initialized (in-memory)"
        );
        Self {
            config,
            variants: DashMap::new(),
            segments: DashMap::new(),
            segment_mixes: DashMap::new(),
            campaigns: DashMap::new(),
            modifiers: DashMap::new(),
            outputs: DashMap::new(),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ─── Variants ──────────────────────────────────────────────────────────

    pub fn insert_variant(&self, variant: Variant) -> LiveOpsResult<()> {
        variant.validate()?;
        self.variants.insert(variant.id, variant);
        Ok(())
    }

    pub fn get_variant(&self, id: VariantId) -> Option<Variant> {
        self.variants.get(&id).map(|r| r.value().clone())
    }

    pub fn variants_for_tutorial(&self, tutorial_id: u32) -> Vec<Variant> {
        let mut variants: Vec<Variant> = self
            .variants
            .iter()
            .filter(|r| r.value().tutorial_id == tutorial_id)
            .map(|r| r.value().clone())
            .collect();
        variants.sort_by_key(|v| v.id);
        variants
    }

    /// Validated against the CTR range and weight shape; rejected while any
    /// campaign over the variant's tutorial is running.
    pub fn update_variant(&self, id: VariantId, update: VariantUpdate) -> LiveOpsResult<Variant> {
        let _lifecycle = self.lifecycle.lock();
        let tutorial_id = self
            .variants
            .get(&id)
            .map(|r| r.value().tutorial_id)
            .ok_or(LiveOpsError::NotFound { entity: "variant", id })?;

        if let Some(running) = self.running_campaign_for(tutorial_id, Utc::now()) {
            warn!(variant_id = id, campaign_id = running, "Variant update rejected: campaign running");
            return Err(LiveOpsError::AlreadyRunning(running));
        }
        if let Some(ctr) = update.base_ctr {
            validate_ctr(id, ctr).map_err(|e| LiveOpsError::invalid(e.to_string()))?;
        }
        if let Some(weights) = &update.base_params_weights {
            validate_weights(id, weights).map_err(|e| LiveOpsError::invalid(e.to_string()))?;
        }

        let mut entry = self
            .variants
            .get_mut(&id)
            .ok_or(LiveOpsError::NotFound { entity: "variant", id })?;
        let v = entry.value_mut();
        if let Some(ctr) = update.base_ctr {
            v.base_ctr = ctr;
        }
        if let Some(weights) = update.base_params_weights {
            v.base_params_weights = Some(weights);
        }
        info!(variant_id = id, base_ctr = v.base_ctr, "Variant updated");
        Ok(v.clone())
    }

    fn running_campaign_for(&self, tutorial_id: u32, now: DateTime<Utc>) -> Option<CampaignId> {
        self.campaigns
            .iter()
            .find(|r| {
                r.value().tutorial_id == tutorial_id
                    && r.value().status(now) == CampaignStatus::Running
            })
            .map(|r| *r.key())
    }

    // ─── Segments & mixes ──────────────────────────────────────────────────

    pub fn insert_segment(&self, segment: Segment) -> LiveOpsResult<()> {
        if !segment.segment_ctr_modifier.is_finite() {
            return Err(LiveOpsError::config(format!(
                "segment {}: segment_ctr_modifier must be finite",
                segment.id
            )));
        }
        self.segments.insert(segment.id, segment);
        Ok(())
    }

    pub fn get_segment(&self, id: SegmentId) -> Option<Segment> {
        self.segments.get(&id).map(|r| r.value().clone())
    }

    /// Percentages must be positive and total 100 within tolerance, and every
    /// entry must reference a known segment.
    pub fn save_segment_mix(&self, mix: SegmentMix) -> LiveOpsResult<()> {
        mix.validate()?;
        if let Some(missing) = mix
            .entries
            .iter()
            .find(|e| !self.segments.contains_key(&e.segment_id))
        {
            return Err(LiveOpsError::NotFound {
                entity: "segment",
                id: missing.segment_id,
            });
        }
        info!(mix_id = mix.id, entries = mix.entries.len(), "Segment mix saved");
        self.segment_mixes.insert(mix.id, mix);
        Ok(())
    }

    pub fn get_segment_mix(&self, id: SegmentMixId) -> Option<SegmentMix> {
        self.segment_mixes.get(&id).map(|r| r.value().clone())
    }

    // ─── Campaigns ─────────────────────────────────────────────────────────

    pub fn create_campaign(&self, campaign: Campaign) -> LiveOpsResult<()> {
        campaign.validate()?;
        if let Some(mix_id) = campaign.segment_mix_id {
            if !self.segment_mixes.contains_key(&mix_id) {
                return Err(LiveOpsError::NotFound {
                    entity: "segment mix",
                    id: mix_id,
                });
            }
        }
        info!(
            campaign_id = campaign.id,
            campaign_type = ?campaign.campaign_type,
            "Campaign created"
        );
        self.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    pub fn get_campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.campaigns.get(&id).map(|r| r.value().clone())
    }

    pub fn list_campaigns(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by_key(|c| c.id);
        campaigns
    }

    /// Upserts `(segment, variant)` modifiers for a campaign that has not started.
    pub fn set_segment_variant_modifiers(
        &self,
        campaign_id: CampaignId,
        modifiers: Vec<SegmentVariantModifier>,
    ) -> LiveOpsResult<()> {
        let _lifecycle = self.lifecycle.lock();
        let campaign = self.get_campaign(campaign_id).ok_or(LiveOpsError::NotFound {
            entity: "campaign",
            id: campaign_id,
        })?;
        if campaign.start_time.is_some() {
            warn!(campaign_id, "Modifier write rejected: campaign already started");
            return Err(LiveOpsError::invalid(format!(
                "campaign {campaign_id} has started; modifiers are frozen"
            )));
        }
        for m in &modifiers {
            if !m.performance_modifier.is_finite() {
                return Err(LiveOpsError::invalid(format!(
                    "modifier for segment {} / variant {} must be finite",
                    m.segment_id, m.variant_id
                )));
            }
            if !self.segments.contains_key(&m.segment_id) {
                return Err(LiveOpsError::NotFound {
                    entity: "segment",
                    id: m.segment_id,
                });
            }
            if !self.variants.contains_key(&m.variant_id) {
                return Err(LiveOpsError::NotFound {
                    entity: "variant",
                    id: m.variant_id,
                });
            }
        }

        let count = modifiers.len();
        let mut table = self.modifiers.entry(campaign_id).or_default();
        for m in modifiers {
            table.insert((m.segment_id, m.variant_id), m.performance_modifier);
        }
        info!(campaign_id, upserted = count, "Segment variant modifiers saved");
        Ok(())
    }

    pub fn segment_variant_modifiers(&self, campaign_id: CampaignId) -> Vec<SegmentVariantModifier> {
        self.modifiers
            .get(&campaign_id)
            .map(|table| {
                table
                    .iter()
                    .map(|(&(segment_id, variant_id), &performance_modifier)| SegmentVariantModifier {
                        segment_id,
                        variant_id,
                        performance_modifier,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve the stored rows a run of `campaign_id` needs.
    pub fn plan_for(&self, campaign_id: CampaignId, settings: EngineSettings) -> LiveOpsResult<SimulationPlan> {
        let campaign = self.get_campaign(campaign_id).ok_or(LiveOpsError::NotFound {
            entity: "campaign",
            id: campaign_id,
        })?;
        let variants = self.variants_for_tutorial(campaign.tutorial_id);
        if variants.is_empty() {
            return Err(LiveOpsError::config(format!(
                "tutorial {} has no variants",
                campaign.tutorial_id
            )));
        }

        let mut plan = SimulationPlan::new(campaign.clone(), variants).with_settings(settings);
        if let Some(mix_id) = campaign.segment_mix_id {
            let mix = self.get_segment_mix(mix_id).ok_or_else(|| {
                LiveOpsError::config(format!("campaign {campaign_id}: segment mix {mix_id} missing"))
            })?;
            let segments = mix
                .entries
                .iter()
                .map(|e| {
                    self.get_segment(e.segment_id).ok_or_else(|| {
                        LiveOpsError::config(format!(
                            "segment mix {mix_id}: segment {} missing",
                            e.segment_id
                        ))
                    })
                })
                .collect::<LiveOpsResult<Vec<_>>>()?;
            plan = plan.with_segments(mix, segments, self.segment_variant_modifiers(campaign_id));
        }
        Ok(plan)
    }

    pub(crate) fn mark_started(&self, campaign_id: CampaignId, at: DateTime<Utc>) -> LiveOpsResult<()> {
        let _lifecycle = self.lifecycle.lock();
        let mut entry = self.campaigns.get_mut(&campaign_id).ok_or(LiveOpsError::NotFound {
            entity: "campaign",
            id: campaign_id,
        })?;
        entry.start_time = Some(at);
        entry.end_time = None;
        Ok(())
    }

    pub(crate) fn mark_finished(&self, campaign_id: CampaignId, at: DateTime<Utc>) {
        if let Some(mut entry) = self.campaigns.get_mut(&campaign_id) {
            entry.end_time = Some(at);
        }
    }

    // ─── Run output ────────────────────────────────────────────────────────

    /// Start a fresh output for a run, replacing any previous run's output.
    pub(crate) fn begin_output(&self, record: RunRecord, initial: SimulationResult) -> Arc<RwLock<RunOutput>> {
        let campaign_id = record.campaign_id;
        let output = Arc::new(RwLock::new(RunOutput {
            record,
            result: initial,
            impressions: Vec::new(),
        }));
        self.outputs.insert(campaign_id, Arc::clone(&output));
        output
    }

    /// Append a batch and replace the snapshot in one write.
    pub(crate) fn publish(output: &RwLock<RunOutput>, batch: Vec<Impression>, snapshot: SimulationResult) {
        let mut out = output.write();
        out.impressions.extend(batch);
        out.result = snapshot;
    }

    pub(crate) fn get_run_output(&self, campaign_id: CampaignId) -> LiveOpsResult<Arc<RwLock<RunOutput>>> {
        self.outputs
            .get(&campaign_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(LiveOpsError::NotFound {
                entity: "simulation result for campaign",
                id: campaign_id,
            })
    }

    /// Snapshot as of the latest published batch.
    pub fn get_simulation_result(&self, campaign_id: CampaignId) -> LiveOpsResult<SimulationResult> {
        Ok(self.get_run_output(campaign_id)?.read().result.clone())
    }

    /// Impressions in simulation order, consistent with the current snapshot.
    pub fn get_impressions(&self, campaign_id: CampaignId) -> LiveOpsResult<Vec<Impression>> {
        Ok(self.get_run_output(campaign_id)?.read().impressions.clone())
    }

    pub fn get_run_record(&self, campaign_id: CampaignId) -> LiveOpsResult<RunRecord> {
        Ok(self.get_run_output(campaign_id)?.read().record.clone())
    }

    // ─── Scenarios ─────────────────────────────────────────────────────────

    /// Stage a whole scenario. Rows are written in dependency order so each
    /// write's checks see the rows it references.
    pub fn load_scenario(&self, scenario: Scenario) -> LiveOpsResult<CampaignId> {
        let Scenario {
            campaign,
            variants,
            segments,
            segment_mix,
            modifiers,
            min_ctr,
            max_ctr,
        } = scenario;

        for v in variants {
            self.insert_variant(v.resolve(campaign.tutorial_id, min_ctr, max_ctr)?)?;
        }
        for s in segments {
            self.insert_segment(s)?;
        }
        if let Some(mix) = segment_mix {
            self.save_segment_mix(mix)?;
        }
        let campaign_id = campaign.id;
        self.create_campaign(campaign)?;
        if !modifiers.is_empty() {
            self.set_segment_variant_modifiers(campaign_id, modifiers)?;
        }
        info!(campaign_id, "Scenario loaded");
        Ok(campaign_id)
    }
}

impl Default for LiveOpsStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
