//! Bandit policy capability and its per-campaign-type dispatch.

use crate::bandits::MabPolicy;
use crate::context::Opportunity;
use crate::contextual::LinUcbPolicy;
use crate::segmented::SegmentedPolicy;
use liveops_core::types::{CampaignType, VariantId};
use liveops_core::{LiveOpsError, LiveOpsResult};

/// Online decision engine: one `choose` per impression, followed by exactly one
/// `update` for the variant it returned.
pub trait BanditPolicy {
    fn choose(&mut self, opportunity: &Opportunity) -> LiveOpsResult<VariantId>;

    fn update(
        &mut self,
        variant_id: VariantId,
        clicked: bool,
        opportunity: &Opportunity,
    ) -> LiveOpsResult<()>;
}

/// Tracks the outstanding choice so an `update` can be checked against it.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingChoice {
    outstanding: Option<VariantId>,
}

impl PendingChoice {
    pub(crate) fn arm(&mut self, variant_id: VariantId) {
        self.outstanding = Some(variant_id);
    }

    pub(crate) fn settle(&mut self, variant_id: VariantId) -> LiveOpsResult<()> {
        match self.outstanding.take() {
            Some(expected) if expected == variant_id => Ok(()),
            Some(expected) => {
                self.outstanding = Some(expected);
                Err(LiveOpsError::InvalidPolicyUse(format!(
                    "update for variant {variant_id} but last choice was {expected}"
                )))
            }
            None => Err(LiveOpsError::InvalidPolicyUse(format!(
                "update for variant {variant_id} without a preceding choose"
            ))),
        }
    }
}

/// The concrete policy for a campaign, selected once when a run is built.
#[derive(Debug, Clone)]
pub enum Policy {
    Mab(MabPolicy),
    Segmented(SegmentedPolicy),
    Contextual(LinUcbPolicy),
}

impl Policy {
    pub fn campaign_type(&self) -> CampaignType {
        match self {
            Policy::Mab(_) => CampaignType::Mab,
            Policy::Segmented(_) => CampaignType::SegmentedMab,
            Policy::Contextual(_) => CampaignType::ContextualMab,
        }
    }
}

impl BanditPolicy for Policy {
    fn choose(&mut self, opportunity: &Opportunity) -> LiveOpsResult<VariantId> {
        match self {
            Policy::Mab(p) => p.choose(opportunity),
            Policy::Segmented(p) => p.choose(opportunity),
            Policy::Contextual(p) => p.choose(opportunity),
        }
    }

    fn update(
        &mut self,
        variant_id: VariantId,
        clicked: bool,
        opportunity: &Opportunity,
    ) -> LiveOpsResult<()> {
        match self {
            Policy::Mab(p) => p.update(variant_id, clicked, opportunity),
            Policy::Segmented(p) => p.update(variant_id, clicked, opportunity),
            Policy::Contextual(p) => p.update(variant_id, clicked, opportunity),
        }
    }
}
