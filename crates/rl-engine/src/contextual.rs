//! Contextual Bandits: LinUCB over the 7-dimensional impression context.
//!
//! Each variant keeps a ridge-regression state `(A⁻¹, b)`. Scores are
//! `x·θ + α·sqrt(xᵀA⁻¹x)` with `θ = A⁻¹b`; updates apply the Sherman–Morrison
//! rank-1 form so `A` is never inverted explicitly.

use crate::context::Opportunity;
use crate::policy::{BanditPolicy, PendingChoice};
use liveops_core::types::{VariantId, CONTEXT_DIM};
use liveops_core::{LiveOpsError, LiveOpsResult};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

pub const FEATURE_NAMES: [&str; CONTEXT_DIM] = [
    "age",
    "sessions_per_day",
    "avg_session_length",
    "lifetime_spend",
    "playstyle_0",
    "playstyle_1",
    "playstyle_2",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmScore {
    pub variant_id: VariantId,
    pub ucb: f64,
    pub mean: f64,
    pub bonus: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature_name: String,
    pub importance: f64,
}

#[derive(Debug, Clone)]
struct ArmModel {
    a_inv: Array2<f64>,
    b: Array1<f64>,
    pulls: u64,
}

impl ArmModel {
    fn new(lambda: f64) -> Self {
        let diag = if lambda.is_finite() && lambda > 0.0 {
            1.0 / lambda
        } else {
            1.0
        };
        Self {
            a_inv: Array2::eye(CONTEXT_DIM) * diag,
            b: Array1::zeros(CONTEXT_DIM),
            pulls: 0,
        }
    }

    fn theta(&self) -> Array1<f64> {
        self.a_inv.dot(&self.b)
    }

    fn score(&self, x: &Array1<f64>, alpha: f64) -> (f64, f64) {
        let mean = self.theta().dot(x);
        let variance = x.dot(&self.a_inv.dot(x)).max(0.0);
        (mean, alpha * variance.sqrt())
    }

    fn observe(&mut self, x: &Array1<f64>, reward: f64) {
        let a_inv_x = self.a_inv.dot(x);
        let denom = 1.0 + x.dot(&a_inv_x);
        let column = a_inv_x.view().insert_axis(Axis(1));
        let row = a_inv_x.view().insert_axis(Axis(0));
        let outer = column.dot(&row);
        self.a_inv.scaled_add(-1.0 / denom, &outer);
        self.b.scaled_add(reward, x);
        self.pulls += 1;
    }
}

#[derive(Debug, Clone)]
pub struct LinUcbPolicy {
    alpha: f64,
    arms: Vec<VariantId>,
    models: Vec<ArmModel>,
    pending: PendingChoice,
}

impl LinUcbPolicy {
    pub fn new(mut arms: Vec<VariantId>, alpha: f64, lambda: f64) -> LiveOpsResult<Self> {
        if arms.is_empty() {
            return Err(LiveOpsError::config("contextual bandit needs at least one variant"));
        }
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(LiveOpsError::config(format!("LinUCB alpha {alpha} must be >= 0")));
        }
        arms.sort_unstable();
        arms.dedup();
        let models = arms.iter().map(|_| ArmModel::new(lambda)).collect();
        Ok(Self {
            alpha,
            arms,
            models,
            pending: PendingChoice::default(),
        })
    }

    fn context_vector(opportunity: &Opportunity) -> LiveOpsResult<Array1<f64>> {
        let features = opportunity.features().ok_or_else(|| {
            LiveOpsError::InvalidPolicyUse("contextual bandit needs a context opportunity".into())
        })?;
        if features.len() != CONTEXT_DIM {
            return Err(LiveOpsError::invalid(format!(
                "context has {} features, expected {CONTEXT_DIM}",
                features.len()
            )));
        }
        Ok(features
            .iter()
            .map(|v| if v.is_finite() { *v } else { 0.0 })
            .collect())
    }

    /// Per-variant UCB breakdown for a context.
    pub fn scores(&self, opportunity: &Opportunity) -> LiveOpsResult<Vec<ArmScore>> {
        let x = Self::context_vector(opportunity)?;
        Ok(self
            .arms
            .iter()
            .zip(self.models.iter())
            .map(|(&variant_id, model)| {
                let (mean, bonus) = model.score(&x, self.alpha);
                ArmScore {
                    variant_id,
                    ucb: mean + bonus,
                    mean,
                    bonus,
                }
            })
            .collect())
    }

    pub fn pulls(&self, variant_id: VariantId) -> u64 {
        self.arms
            .binary_search(&variant_id)
            .map(|i| self.models[i].pulls)
            .unwrap_or(0)
    }

    /// Mean absolute coefficient per feature across variants, normalised to sum to 1.
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let mut importance = vec![0.0; CONTEXT_DIM];
        for model in &self.models {
            for (acc, w) in importance.iter_mut().zip(model.theta().iter()) {
                *acc += w.abs();
            }
        }
        let total: f64 = importance.iter().sum();
        FEATURE_NAMES
            .iter()
            .zip(importance)
            .map(|(name, value)| FeatureImportance {
                feature_name: (*name).to_string(),
                importance: if total > 0.0 { value / total } else { 0.0 },
            })
            .collect()
    }
}

impl BanditPolicy for LinUcbPolicy {
    /// Argmax of the UCB score; ties go to the lowest variant id.
    fn choose(&mut self, opportunity: &Opportunity) -> LiveOpsResult<VariantId> {
        let scores = self.scores(opportunity)?;
        let mut best_score = f64::NEG_INFINITY;
        let mut best = self.arms[0];
        for score in &scores {
            if score.ucb > best_score {
                best_score = score.ucb;
                best = score.variant_id;
            }
        }
        self.pending.arm(best);
        Ok(best)
    }

    fn update(
        &mut self,
        variant_id: VariantId,
        clicked: bool,
        opportunity: &Opportunity,
    ) -> LiveOpsResult<()> {
        let x = Self::context_vector(opportunity)?;
        self.pending.settle(variant_id)?;
        let index = self
            .arms
            .binary_search(&variant_id)
            .map_err(|_| LiveOpsError::InvalidPolicyUse(format!("unknown variant {variant_id}")))?;
        self.models[index].observe(&x, if clicked { 1.0 } else { 0.0 });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(values: [f64; CONTEXT_DIM]) -> Opportunity {
        Opportunity::Context(values.to_vec())
    }

    fn basis(i: usize) -> Opportunity {
        let mut x = [0.0; CONTEXT_DIM];
        x[i] = 1.0;
        ctx(x)
    }

    #[test]
    fn test_fresh_model_ties_break_to_lowest_id() {
        let mut policy = LinUcbPolicy::new(vec![8, 3, 5], 1.0, 1.0).unwrap();
        assert_eq!(policy.choose(&ctx([0.5; CONTEXT_DIM])).unwrap(), 3);
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let mut policy = LinUcbPolicy::new(vec![1], 1.0, 1.0).unwrap();
        assert!(matches!(
            policy.choose(&Opportunity::Context(vec![1.0; 3])),
            Err(LiveOpsError::InvalidArgument(_))
        ));
        assert!(matches!(
            policy.choose(&Opportunity::Plain),
            Err(LiveOpsError::InvalidPolicyUse(_))
        ));
    }

    #[test]
    fn test_sherman_morrison_matches_closed_form() {
        // With lambda = 1 and a single observation x, A = I + xxᵀ and
        // A⁻¹ = I - xxᵀ / (1 + xᵀx).
        let mut model = ArmModel::new(1.0);
        let x = Array1::from(vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        model.observe(&x, 1.0);
        let xtx = x.dot(&x);
        for i in 0..CONTEXT_DIM {
            for j in 0..CONTEXT_DIM {
                let identity = if i == j { 1.0 } else { 0.0 };
                let expected = identity - x[i] * x[j] / (1.0 + xtx);
                assert!((model.a_inv[[i, j]] - expected).abs() < 1e-12);
            }
        }
        assert_eq!(model.b, x);
    }

    #[test]
    fn test_learns_context_dependent_preference() {
        let mut policy = LinUcbPolicy::new(vec![1, 2], 0.5, 1.0).unwrap();
        for i in 0..400 {
            // Variant 1 pays off on feature 0, variant 2 on feature 1.
            let feature = i % 2;
            let opp = basis(feature);
            let v = policy.choose(&opp).unwrap();
            let clicked = (feature == 0 && v == 1) || (feature == 1 && v == 2);
            policy.update(v, clicked, &opp).unwrap();
        }
        assert_eq!(policy.choose(&basis(0)).unwrap(), 1);
        policy.update(1, true, &basis(0)).unwrap();
        assert_eq!(policy.choose(&basis(1)).unwrap(), 2);
    }

    #[test]
    fn test_update_checks_pending_choice() {
        let mut policy = LinUcbPolicy::new(vec![1, 2], 1.0, 1.0).unwrap();
        let opp = ctx([0.1; CONTEXT_DIM]);
        assert!(policy.update(1, true, &opp).is_err());
        let v = policy.choose(&opp).unwrap();
        assert!(policy.update(v, false, &opp).is_ok());
        assert_eq!(policy.pulls(v), 1);
    }

    #[test]
    fn test_feature_importance_normalised() {
        let mut policy = LinUcbPolicy::new(vec![1], 1.0, 1.0).unwrap();
        let opp = basis(2);
        let v = policy.choose(&opp).unwrap();
        policy.update(v, true, &opp).unwrap();
        let importance = policy.feature_importance();
        assert_eq!(importance.len(), CONTEXT_DIM);
        let total: f64 = importance.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(importance[2].feature_name, "avg_session_length");
        assert!((importance[2].importance - 1.0).abs() < 1e-12);
    }
}
