//! Segment-sliced bandit: an independent plain MAB per segment-mix entry, plus
//! the weighted sampler that assigns impressions to entries.

use crate::bandits::MabPolicy;
use crate::context::Opportunity;
use crate::policy::BanditPolicy;
use liveops_core::config::BanditAlgorithm;
use liveops_core::types::{SegmentId, SegmentMix, VariantId};
use liveops_core::{LiveOpsError, LiveOpsResult};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Categorical distribution over mix entries, weighted by percentage.
#[derive(Debug, Clone)]
pub struct SegmentSampler {
    segment_ids: Vec<SegmentId>,
    weights: WeightedIndex<f64>,
}

impl SegmentSampler {
    pub fn new(mix: &SegmentMix) -> LiveOpsResult<Self> {
        if mix.entries.is_empty() {
            return Err(LiveOpsError::config(format!(
                "segment mix {} has no entries",
                mix.id
            )));
        }
        let weights = WeightedIndex::new(mix.entries.iter().map(|e| e.percentage))
            .map_err(|e| LiveOpsError::config(format!("segment mix {}: {e}", mix.id)))?;
        Ok(Self {
            segment_ids: mix.segment_ids(),
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.segment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_ids.is_empty()
    }

    pub fn segment_ids(&self) -> &[SegmentId] {
        &self.segment_ids
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Opportunity {
        let index = self.weights.sample(rng);
        Opportunity::Segment {
            index,
            segment_id: self.segment_ids[index],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentedPolicy {
    bandits: Vec<MabPolicy>,
}

impl SegmentedPolicy {
    /// One bandit per mix entry, each seeded from `seed` plus its entry index.
    pub fn new(
        segment_count: usize,
        arms: Vec<VariantId>,
        algorithm: BanditAlgorithm,
        seed: u64,
    ) -> LiveOpsResult<Self> {
        if segment_count == 0 {
            return Err(LiveOpsError::config("segmented bandit needs at least one segment"));
        }
        let bandits = (0..segment_count as u64)
            .map(|i| MabPolicy::new(arms.clone(), algorithm, seed.wrapping_add(i)))
            .collect::<LiveOpsResult<Vec<_>>>()?;
        Ok(Self { bandits })
    }

    pub fn segment_bandit(&self, index: usize) -> Option<&MabPolicy> {
        self.bandits.get(index)
    }

    fn bandit_for(&mut self, opportunity: &Opportunity) -> LiveOpsResult<&mut MabPolicy> {
        let index = opportunity.segment_index().ok_or_else(|| {
            LiveOpsError::InvalidPolicyUse("segmented bandit needs a segment opportunity".into())
        })?;
        self.bandits.get_mut(index).ok_or_else(|| {
            LiveOpsError::InvalidPolicyUse(format!("no bandit for segment entry {index}"))
        })
    }
}

impl BanditPolicy for SegmentedPolicy {
    fn choose(&mut self, opportunity: &Opportunity) -> LiveOpsResult<VariantId> {
        self.bandit_for(opportunity)?.choose(opportunity)
    }

    fn update(
        &mut self,
        variant_id: VariantId,
        clicked: bool,
        opportunity: &Opportunity,
    ) -> LiveOpsResult<()> {
        self.bandit_for(opportunity)?
            .update(variant_id, clicked, opportunity)
    }
}
