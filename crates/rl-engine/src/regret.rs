//! Regret accumulation against the oracle arm, for the policy and for a
//! uniform-random baseline, globally and per segment-mix entry.

use liveops_core::types::{CampaignType, SegmentRegret, SimulationResult, VariantId};
use std::collections::BTreeMap;

/// Per-impression regret pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstantRegret {
    pub oracle_ctr: f64,
    pub mab: f64,
    pub uniform: f64,
}

impl InstantRegret {
    /// `ctrs` are the effective CTRs of every variant for the impression's
    /// segment or context. The uniform baseline is analytic: oracle minus the
    /// mean CTR.
    pub fn compute(ctrs: &[f64], chosen: usize) -> Self {
        let oracle_ctr = ctrs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = ctrs.iter().sum::<f64>() / ctrs.len() as f64;
        // Summation rounding can push the mean a hair above the max.
        Self {
            oracle_ctr,
            mab: (oracle_ctr - ctrs[chosen]).max(0.0),
            uniform: (oracle_ctr - mean).max(0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegretAccumulator {
    campaign_type: CampaignType,
    variant_ids: Vec<VariantId>,
    total_impressions: u64,
    cumulative_mab: f64,
    cumulative_uniform: f64,
    variant_counts: Vec<u64>,
    segments: Vec<SegmentTally>,
}

#[derive(Debug, Clone)]
struct SegmentTally {
    impressions: u64,
    mab: f64,
    uniform: f64,
    variant_counts: Vec<u64>,
}

impl RegretAccumulator {
    /// `segment_count` is the number of mix entries (0 when unsegmented).
    pub fn new(campaign_type: CampaignType, variant_ids: Vec<VariantId>, segment_count: usize) -> Self {
        let k = variant_ids.len();
        Self {
            campaign_type,
            variant_ids,
            total_impressions: 0,
            cumulative_mab: 0.0,
            cumulative_uniform: 0.0,
            variant_counts: vec![0; k],
            segments: (0..segment_count)
                .map(|_| SegmentTally {
                    impressions: 0,
                    mab: 0.0,
                    uniform: 0.0,
                    variant_counts: vec![0; k],
                })
                .collect(),
        }
    }

    /// Record one completed impression. `chosen` indexes `ctrs` and the
    /// variant list; `segment` is the 0-based mix entry index.
    pub fn record(&mut self, ctrs: &[f64], chosen: usize, segment: Option<usize>) -> InstantRegret {
        let regret = InstantRegret::compute(ctrs, chosen);

        self.total_impressions += 1;
        self.cumulative_mab += regret.mab;
        self.cumulative_uniform += regret.uniform;
        self.variant_counts[chosen] += 1;

        if let Some(tally) = segment.and_then(|i| self.segments.get_mut(i)) {
            tally.impressions += 1;
            tally.mab += regret.mab;
            tally.uniform += regret.uniform;
            tally.variant_counts[chosen] += 1;
        }

        regret
    }

    pub fn total_impressions(&self) -> u64 {
        self.total_impressions
    }

    pub fn cumulative_regret_mab(&self) -> f64 {
        self.cumulative_mab
    }

    pub fn cumulative_regret_uniform(&self) -> f64 {
        self.cumulative_uniform
    }

    fn count_map(&self, counts: &[u64]) -> BTreeMap<VariantId, u64> {
        self.variant_ids
            .iter()
            .zip(counts.iter())
            .filter(|(_, c)| **c > 0)
            .map(|(&id, &c)| (id, c))
            .collect()
    }

    /// Immutable snapshot. Segment keys become 1-based entry positions here
    /// and nowhere else.
    pub fn snapshot(&self, true_ctrs: BTreeMap<VariantId, f64>, completed: bool) -> SimulationResult {
        let per_segment_regret = self
            .segments
            .iter()
            .enumerate()
            .map(|(i, tally)| {
                (
                    i as u32 + 1,
                    SegmentRegret {
                        impressions: tally.impressions,
                        mab_regret: tally.mab,
                        uniform_regret: tally.uniform,
                        variant_counts: self.count_map(&tally.variant_counts),
                    },
                )
            })
            .collect();

        SimulationResult {
            campaign_type: self.campaign_type,
            total_impressions: self.total_impressions,
            cumulative_regret_mab: self.cumulative_mab,
            cumulative_regret_uniform: self.cumulative_uniform,
            variant_counts: self.count_map(&self.variant_counts),
            per_segment_regret,
            true_ctrs,
            completed,
        }
    }
}
