//! Reward model: the true click probability of a variant for one opportunity,
//! and Bernoulli outcome sampling against it.

use crate::context::Opportunity;
use liveops_core::config::LinkFunction;
use liveops_core::types::{
    Segment, SegmentId, SegmentVariantModifier, Variant, VariantId, CONTEXT_DIM,
};
use liveops_core::{LiveOpsError, LiveOpsResult};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Bounded link between a context vector and a variant's weights.
pub trait ContextLink: Send + Sync {
    /// Must return a value in [0, 1].
    fn probability(&self, context: &[f64], weights: &[f64]) -> f64;
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn l2_normalized(v: &[f64]) -> Vec<f64> {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        vec![0.0; v.len()]
    }
}

impl ContextLink for LinkFunction {
    fn probability(&self, context: &[f64], weights: &[f64]) -> f64 {
        let p = match self {
            LinkFunction::Logistic => {
                let z = dot(&l2_normalized(context), &l2_normalized(weights));
                1.0 / (1.0 + (-z).exp())
            }
            LinkFunction::ScaledDot => dot(context, weights) / CONTEXT_DIM as f64,
        };
        if p.is_finite() {
            p.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Effective CTRs for every variant of a campaign. Variants are held in
/// ascending id order; indices returned by [`RewardModel::index_of`] follow it.
#[derive(Clone)]
pub struct RewardModel {
    variants: Vec<Variant>,
    modifiers: HashMap<(SegmentId, VariantId), f64>,
    segment_fallback: HashMap<SegmentId, f64>,
    weights: Option<Vec<Vec<f64>>>,
    link: Arc<dyn ContextLink>,
}

impl std::fmt::Debug for RewardModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardModel")
            .field("variants", &self.variants)
            .field("modifiers", &self.modifiers.len())
            .field("contextual", &self.weights.is_some())
            .finish()
    }
}

impl RewardModel {
    pub fn new(mut variants: Vec<Variant>) -> LiveOpsResult<Self> {
        if variants.is_empty() {
            return Err(LiveOpsError::config("campaign has no variants"));
        }
        for variant in &variants {
            variant.validate()?;
        }
        variants.sort_by_key(|v| v.id);
        if variants.windows(2).any(|w| w[0].id == w[1].id) {
            return Err(LiveOpsError::config("duplicate variant id"));
        }
        Ok(Self {
            variants,
            modifiers: HashMap::new(),
            segment_fallback: HashMap::new(),
            weights: None,
            link: Arc::new(LinkFunction::default()),
        })
    }

    /// Attach segment effects. Explicit pair modifiers win over the segment's
    /// legacy flat modifier.
    pub fn with_segments(
        mut self,
        segments: &[Segment],
        modifiers: &[SegmentVariantModifier],
    ) -> LiveOpsResult<Self> {
        for m in modifiers {
            if !m.performance_modifier.is_finite() {
                return Err(LiveOpsError::config(format!(
                    "modifier for segment {} / variant {} is not finite",
                    m.segment_id, m.variant_id
                )));
            }
            self.modifiers
                .insert((m.segment_id, m.variant_id), m.performance_modifier);
        }
        for s in segments {
            if s.segment_ctr_modifier != 0.0 {
                self.segment_fallback.insert(s.id, s.segment_ctr_modifier);
            }
        }
        Ok(self)
    }

    /// Switch to contextual mode. Every variant needs a 7-long weight vector.
    pub fn contextual(mut self, link: Arc<dyn ContextLink>) -> LiveOpsResult<Self> {
        let weights = self
            .variants
            .iter()
            .map(|v| v.contextual_weights().map(<[f64]>::to_vec))
            .collect::<LiveOpsResult<Vec<_>>>()?;
        self.weights = Some(weights);
        self.link = link;
        Ok(self)
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant_ids(&self) -> Vec<VariantId> {
        self.variants.iter().map(|v| v.id).collect()
    }

    pub fn index_of(&self, variant_id: VariantId) -> Option<usize> {
        self.variants
            .binary_search_by_key(&variant_id, |v| v.id)
            .ok()
    }

    pub fn modifier_for(&self, segment_id: SegmentId, variant_id: VariantId) -> f64 {
        self.modifiers
            .get(&(segment_id, variant_id))
            .or_else(|| self.segment_fallback.get(&segment_id))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn effective_ctr(&self, index: usize, opportunity: &Opportunity) -> f64 {
        let variant = &self.variants[index];
        match (opportunity, &self.weights) {
            (Opportunity::Context(x), Some(weights)) => {
                self.link.probability(x, &weights[index])
            }
            (Opportunity::Segment { segment_id, .. }, _) => {
                (variant.base_ctr + self.modifier_for(*segment_id, variant.id)).clamp(0.0, 1.0)
            }
            _ => variant.base_ctr,
        }
    }

    pub fn effective_ctrs(&self, opportunity: &Opportunity) -> Vec<f64> {
        (0..self.variants.len())
            .map(|i| self.effective_ctr(i, opportunity))
            .collect()
    }

    pub fn sample_outcome(
        &self,
        index: usize,
        opportunity: &Opportunity,
        rng: &mut impl Rng,
    ) -> bool {
        rng.gen::<f64>() < self.effective_ctr(index, opportunity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn variant(id: VariantId, base_ctr: f64) -> Variant {
        Variant {
            id,
            tutorial_id: 1,
            name: format!("v{id}"),
            base_ctr,
            base_params_weights: None,
        }
    }

    fn segment(id: SegmentId, flat: f64) -> Segment {
        Segment {
            id,
            name: format!("s{id}"),
            description: None,
            segment_ctr_modifier: flat,
        }
    }

    #[test]
    fn test_rejects_bad_variants() {
        assert!(RewardModel::new(vec![]).is_err());
        assert!(RewardModel::new(vec![variant(1, 1.5)]).is_err());
        assert!(RewardModel::new(vec![variant(1, 0.2), variant(1, 0.3)]).is_err());
    }

    #[test]
    fn test_variants_sorted_by_id() {
        let model = RewardModel::new(vec![variant(5, 0.1), variant(2, 0.2)]).unwrap();
        assert_eq!(model.variant_ids(), vec![2, 5]);
        assert_eq!(model.index_of(5), Some(1));
        assert_eq!(model.index_of(3), None);
    }

    #[test]
    fn test_segment_modifiers_clamped() {
        let model = RewardModel::new(vec![variant(1, 0.95), variant(2, 0.05)])
            .unwrap()
            .with_segments(
                &[segment(10, 0.0)],
                &[
                    SegmentVariantModifier {
                        segment_id: 10,
                        variant_id: 1,
                        performance_modifier: 0.2,
                    },
                    SegmentVariantModifier {
                        segment_id: 10,
                        variant_id: 2,
                        performance_modifier: -0.3,
                    },
                ],
            )
            .unwrap();
        let opp = Opportunity::Segment {
            index: 0,
            segment_id: 10,
        };
        assert_eq!(model.effective_ctrs(&opp), vec![1.0, 0.0]);
        assert_eq!(model.effective_ctrs(&Opportunity::Plain), vec![0.95, 0.05]);
    }

    #[test]
    fn test_missing_modifier_defaults_to_zero() {
        let model = RewardModel::new(vec![variant(1, 0.3)])
            .unwrap()
            .with_segments(&[segment(10, 0.0)], &[])
            .unwrap();
        assert_eq!(model.modifier_for(10, 1), 0.0);
        assert_eq!(model.modifier_for(99, 1), 0.0);
    }

    #[test]
    fn test_legacy_segment_modifier_is_fallback() {
        let model = RewardModel::new(vec![variant(1, 0.3), variant(2, 0.3)])
            .unwrap()
            .with_segments(
                &[segment(10, 0.1)],
                &[SegmentVariantModifier {
                    segment_id: 10,
                    variant_id: 2,
                    performance_modifier: -0.2,
                }],
            )
            .unwrap();
        assert!((model.modifier_for(10, 1) - 0.1).abs() < 1e-12);
        assert!((model.modifier_for(10, 2) + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_contextual_requires_weights() {
        let model = RewardModel::new(vec![variant(1, 0.3)]).unwrap();
        assert!(matches!(
            model.contextual(Arc::new(LinkFunction::Logistic)),
            Err(LiveOpsError::Configuration(_))
        ));

        let mut v = variant(1, 0.3);
        v.base_params_weights = Some(vec![0.5; 3]);
        assert!(RewardModel::new(vec![v]).is_err());
    }

    #[test]
    fn test_link_functions_bounded() {
        let x = [1.0; CONTEXT_DIM];
        let w = [1.0; CONTEXT_DIM];
        let logistic = LinkFunction::Logistic.probability(&x, &w);
        assert!((logistic - 1.0 / (1.0 + (-1.0f64).exp())).abs() < 1e-12);
        assert!((LinkFunction::ScaledDot.probability(&x, &w) - 1.0).abs() < 1e-12);
        assert!((LinkFunction::Logistic.probability(&[0.0; CONTEXT_DIM], &w) - 0.5).abs() < 1e-12);
        assert_eq!(LinkFunction::ScaledDot.probability(&[0.0; CONTEXT_DIM], &w), 0.0);
    }

    #[test]
    fn test_contextual_ctr_uses_link() {
        let mut v = variant(1, 0.3);
        v.base_params_weights = Some(vec![0.5; CONTEXT_DIM]);
        let model = RewardModel::new(vec![v])
            .unwrap()
            .contextual(Arc::new(LinkFunction::ScaledDot))
            .unwrap();
        let p = model.effective_ctr(0, &Opportunity::Context(vec![1.0; CONTEXT_DIM]));
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_outcome_frequency_tracks_ctr() {
        let model = RewardModel::new(vec![variant(1, 0.25)]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let clicks = (0..20_000)
            .filter(|_| model.sample_outcome(0, &Opportunity::Plain, &mut rng))
            .count();
        let rate = clicks as f64 / 20_000.0;
        assert!((rate - 0.25).abs() < 0.02, "rate {rate}");
    }
}
