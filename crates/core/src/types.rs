use crate::error::{LiveOpsError, LiveOpsResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub type VariantId = u32;
pub type SegmentId = u32;
pub type SegmentMixId = u32;
pub type TutorialId = u32;
pub type CampaignId = u32;

/// Dimension of the contextual feature vector and of `base_params_weights`.
pub const CONTEXT_DIM: usize = 7;

/// Allowed drift of a segment mix's percentage total away from 100.
pub const MIX_TOTAL_TOLERANCE: f64 = 0.01;

/// One candidate content variant (arm) of a tutorial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub tutorial_id: TutorialId,
    pub name: String,
    /// True conversion probability absent any segment modifier.
    pub base_ctr: f64,
    /// Contextual feature weights, one per context dimension.
    #[serde(default)]
    pub base_params_weights: Option<Vec<f64>>,
}

impl Variant {
    pub fn validate(&self) -> LiveOpsResult<()> {
        validate_ctr(self.id, self.base_ctr)?;
        if let Some(weights) = &self.base_params_weights {
            validate_weights(self.id, weights)?;
        }
        Ok(())
    }

    /// Weights required by contextual campaigns.
    pub fn contextual_weights(&self) -> LiveOpsResult<&[f64]> {
        match &self.base_params_weights {
            Some(weights) => {
                validate_weights(self.id, weights)?;
                Ok(weights)
            }
            None => Err(LiveOpsError::config(format!(
                "variant {} has no base_params_weights",
                self.id
            ))),
        }
    }
}

pub fn validate_ctr(variant_id: VariantId, base_ctr: f64) -> LiveOpsResult<()> {
    if !base_ctr.is_finite() || !(0.0..=1.0).contains(&base_ctr) {
        return Err(LiveOpsError::config(format!(
            "variant {variant_id}: base_ctr {base_ctr} outside [0, 1]"
        )));
    }
    Ok(())
}

pub fn validate_weights(variant_id: VariantId, weights: &[f64]) -> LiveOpsResult<()> {
    if weights.len() != CONTEXT_DIM {
        return Err(LiveOpsError::config(format!(
            "variant {variant_id}: expected {CONTEXT_DIM} weights, got {}",
            weights.len()
        )));
    }
    if let Some(w) = weights
        .iter()
        .find(|w| !w.is_finite() || !(0.0..=1.0).contains(*w))
    {
        return Err(LiveOpsError::config(format!(
            "variant {variant_id}: weight {w} outside [0, 1]"
        )));
    }
    Ok(())
}

/// A user cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Legacy additive modifier applied to every variant when no explicit
    /// per-variant modifier exists for this segment.
    #[serde(default)]
    pub segment_ctr_modifier: f64,
}

/// Additive CTR adjustment for one `(segment, variant)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentVariantModifier {
    pub segment_id: SegmentId,
    pub variant_id: VariantId,
    pub performance_modifier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentMixEntry {
    pub segment_id: SegmentId,
    pub percentage: f64,
}

/// Weighted population of segments. Entry order is significant: result keys
/// refer to the 1-based entry position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMix {
    pub id: SegmentMixId,
    pub name: String,
    pub entries: Vec<SegmentMixEntry>,
}

impl SegmentMix {
    /// Save-time validation: positive percentages, no repeated segment, total of
    /// 100 within [`MIX_TOTAL_TOLERANCE`].
    pub fn validate(&self) -> LiveOpsResult<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !entry.percentage.is_finite() || entry.percentage <= 0.0 {
                return Err(LiveOpsError::config(format!(
                    "segment mix {}: percentage {} for segment {} must be > 0",
                    self.id, entry.percentage, entry.segment_id
                )));
            }
            if !seen.insert(entry.segment_id) {
                return Err(LiveOpsError::config(format!(
                    "segment mix {}: segment {} listed twice",
                    self.id, entry.segment_id
                )));
            }
        }
        let total = self.total_percentage();
        if (total - 100.0).abs() > MIX_TOTAL_TOLERANCE {
            return Err(LiveOpsError::config(format!(
                "segment mix {}: percentages sum to {total}, expected 100",
                self.id
            )));
        }
        Ok(())
    }

    pub fn total_percentage(&self) -> f64 {
        self.entries.iter().map(|e| e.percentage).sum()
    }

    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.entries.iter().map(|e| e.segment_id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignType {
    Mab,
    SegmentedMab,
    ContextualMab,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    NotRun,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tutorial_id: TutorialId,
    pub campaign_type: CampaignType,
    /// Minutes.
    pub duration: u32,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub segment_mix_id: Option<SegmentMixId>,
}

impl Campaign {
    pub fn validate(&self) -> LiveOpsResult<()> {
        if self.duration == 0 {
            return Err(LiveOpsError::config(format!(
                "campaign {}: duration must be positive",
                self.id
            )));
        }
        match (self.campaign_type, self.segment_mix_id) {
            (CampaignType::SegmentedMab, None) => Err(LiveOpsError::config(format!(
                "campaign {}: SEGMENTED_MAB requires a segment_mix_id",
                self.id
            ))),
            (CampaignType::Mab | CampaignType::ContextualMab, Some(_)) => {
                Err(LiveOpsError::config(format!(
                    "campaign {}: segment_mix_id is only valid for SEGMENTED_MAB",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> CampaignStatus {
        match (self.start_time, self.end_time) {
            (None, _) => CampaignStatus::NotRun,
            (Some(_), Some(end)) if end <= now => CampaignStatus::Completed,
            (Some(_), _) => CampaignStatus::Running,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration))
    }
}

/// One simulated opportunity and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impression {
    pub timestamp: DateTime<Utc>,
    pub variant_id: VariantId,
    #[serde(default)]
    pub segment_id: Option<SegmentId>,
    pub clicked: bool,
    /// Feature vector drawn for contextual campaigns.
    #[serde(default)]
    pub context: Option<Vec<f64>>,
}

/// Regret and allocation scoped to one segment-mix entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentRegret {
    pub impressions: u64,
    pub mab_regret: f64,
    pub uniform_regret: f64,
    pub variant_counts: BTreeMap<VariantId, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub campaign_type: CampaignType,
    pub total_impressions: u64,
    pub cumulative_regret_mab: f64,
    pub cumulative_regret_uniform: f64,
    pub variant_counts: BTreeMap<VariantId, u64>,
    /// Keyed by 1-based position of the entry in the campaign's segment mix.
    #[serde(default)]
    pub per_segment_regret: BTreeMap<u32, SegmentRegret>,
    /// Base effective CTR of each variant, before segment or context effects.
    #[serde(default)]
    pub true_ctrs: BTreeMap<VariantId, f64>,
    pub completed: bool,
}
