//! Management request and scenario types.

use chrono::{DateTime, Utc};
use liveops_core::derivation::{derive_base_ctr, derive_param_weights, DEFAULT_MAX_CTR, DEFAULT_MIN_CTR};
use liveops_core::types::{
    Campaign, CampaignId, Impression, Segment, SegmentMix, SegmentVariantModifier,
    SimulationResult, TutorialId, Variant, VariantId,
};
use liveops_core::LiveOpsResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Variant writes ────────────────────────────────────────────────────────

/// Partial variant update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantUpdate {
    #[serde(default)]
    pub base_ctr: Option<f64>,
    #[serde(default)]
    pub base_params_weights: Option<Vec<f64>>,
}

// ─── Runs ──────────────────────────────────────────────────────────────────

/// Bookkeeping for one simulation run of a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub campaign_id: CampaignId,
    pub impressions_count: i64,
    pub seed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Published state of the latest run. Impressions and snapshot are always
/// replaced together so readers never see one ahead of the other.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub record: RunRecord,
    pub result: SimulationResult,
    pub impressions: Vec<Impression>,
}

// ─── Scenarios ─────────────────────────────────────────────────────────────

fn default_min_ctr() -> f64 {
    DEFAULT_MIN_CTR
}

fn default_max_ctr() -> f64 {
    DEFAULT_MAX_CTR
}

/// A variant as written in a scenario file. Missing CTR or weights are derived
/// deterministically from the variant's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioVariant {
    pub id: VariantId,
    pub name: String,
    #[serde(default)]
    pub base_ctr: Option<f64>,
    #[serde(default)]
    pub base_params_weights: Option<Vec<f64>>,
}

impl ScenarioVariant {
    pub fn resolve(self, tutorial_id: TutorialId, min_ctr: f64, max_ctr: f64) -> LiveOpsResult<Variant> {
        let base_ctr = match self.base_ctr {
            Some(ctr) => ctr,
            None => derive_base_ctr(tutorial_id, self.id, &self.name, min_ctr, max_ctr)?,
        };
        let base_params_weights = match self.base_params_weights {
            Some(weights) => weights,
            None => derive_param_weights(tutorial_id, self.id, &self.name)?,
        };
        Ok(Variant {
            id: self.id,
            tutorial_id,
            name: self.name,
            base_ctr,
            base_params_weights: Some(base_params_weights),
        })
    }
}

/// Everything needed to stage one campaign: its tutorial's variants, the
/// segments and mix it draws from, and the per-pair modifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub campaign: Campaign,
    pub variants: Vec<ScenarioVariant>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub segment_mix: Option<SegmentMix>,
    #[serde(default)]
    pub modifiers: Vec<SegmentVariantModifier>,
    #[serde(default = "default_min_ctr")]
    pub min_ctr: f64,
    #[serde(default = "default_max_ctr")]
    pub max_ctr: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_variant_keeps_explicit_values() {
        let v = ScenarioVariant {
            id: 3,
            name: "Gold".to_string(),
            base_ctr: Some(0.25),
            base_params_weights: Some(vec![0.5; 7]),
        };
        let resolved = v.resolve(9, DEFAULT_MIN_CTR, DEFAULT_MAX_CTR).unwrap();
        assert_eq!(resolved.tutorial_id, 9);
        assert_eq!(resolved.base_ctr, 0.25);
        assert_eq!(resolved.base_params_weights, Some(vec![0.5; 7]));
    }

    #[test]
    fn test_scenario_variant_derives_missing_values() {
        let v = ScenarioVariant {
            id: 3,
            name: "Gold".to_string(),
            base_ctr: None,
            base_params_weights: None,
        };
        let a = v.clone().resolve(9, 0.1, 0.2).unwrap();
        let b = v.resolve(9, 0.1, 0.2).unwrap();
        assert_eq!(a, b);
        assert!((0.1..0.2).contains(&a.base_ctr));
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_scenario_parses_with_defaults() {
        let json = r#"{
            "campaign": {"id": 1, "tutorial_id": 2, "campaign_type": "MAB", "duration": 30},
            "variants": [{"id": 1, "name": "A", "base_ctr": 0.3}]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert!(scenario.segment_mix.is_none());
        assert!(scenario.modifiers.is_empty());
        assert_eq!(scenario.min_ctr, DEFAULT_MIN_CTR);
        assert_eq!(scenario.variants[0].base_ctr, Some(0.3));
    }
}
