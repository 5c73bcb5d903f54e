//! Impression opportunities and the feature contexts drawn for contextual campaigns.

use liveops_core::config::ContextDistribution;
use liveops_core::types::{SegmentId, CONTEXT_DIM};
use rand::Rng;
use rand_distr::{Dirichlet, Distribution, Exp, Normal, Poisson};

/// What the policy and reward model know about the impression being served.
#[derive(Debug, Clone, PartialEq)]
pub enum Opportunity {
    Plain,
    /// `index` is the 0-based position of the entry in the segment mix.
    Segment { index: usize, segment_id: SegmentId },
    Context(Vec<f64>),
}

impl Opportunity {
    pub fn segment_index(&self) -> Option<usize> {
        match self {
            Opportunity::Segment { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub fn segment_id(&self) -> Option<SegmentId> {
        match self {
            Opportunity::Segment { segment_id, .. } => Some(*segment_id),
            _ => None,
        }
    }

    pub fn features(&self) -> Option<&[f64]> {
        match self {
            Opportunity::Context(x) => Some(x),
            _ => None,
        }
    }
}

const MIN_AGE: u32 = 13;
const MAX_AGE: u32 = 50;
const MAX_SESSIONS: f64 = 10.0;
const MAX_SESSION_MINUTES: f64 = 60.0;
const SPEND_SCALE: f64 = 20.0;

/// Draws 7-dimensional feature vectors.
#[derive(Debug, Clone)]
pub struct ContextSampler {
    distribution: ContextDistribution,
}

impl ContextSampler {
    pub fn new(distribution: ContextDistribution) -> Self {
        Self { distribution }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Vec<f64> {
        match self.distribution {
            ContextDistribution::Uniform => (0..CONTEXT_DIM).map(|_| rng.gen::<f64>()).collect(),
            ContextDistribution::PlayerProfile => Self::player_profile(rng),
        }
    }

    /// Age, sessions per day, average session length, lifetime spend, then a
    /// 3-dim playstyle mix. Everything is scaled into [0, 1].
    fn player_profile(rng: &mut impl Rng) -> Vec<f64> {
        let age = rng.gen_range(MIN_AGE..=MAX_AGE);
        let sessions = Poisson::new(2.0)
            .map(|d| Distribution::<f64>::sample(&d, rng))
            .unwrap_or(2.0)
            .max(1.0);
        let session_length = Normal::<f64>::new(20.0, 10.0)
            .map(|d| d.sample(rng))
            .unwrap_or(20.0)
            .max(0.0);
        let spend = Exp::<f64>::new(1.0 / 5.0)
            .map(|d| d.sample(rng))
            .unwrap_or(0.0)
            .max(0.0);
        let playstyle = Dirichlet::new(&[1.0; 3])
            .map(|d| d.sample(rng))
            .unwrap_or_else(|_| vec![1.0 / 3.0; 3]);

        let mut x = Vec::with_capacity(CONTEXT_DIM);
        x.push(f64::from(age - MIN_AGE) / f64::from(MAX_AGE - MIN_AGE));
        x.push((sessions / MAX_SESSIONS).min(1.0));
        x.push((session_length / MAX_SESSION_MINUTES).min(1.0));
        x.push((spend / SPEND_SCALE).min(1.0));
        x.extend(playstyle);
        x
    }
}
