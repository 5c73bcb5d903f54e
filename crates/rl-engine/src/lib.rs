//! Bandit engine for LiveOps campaigns: plain multi-armed bandits (Thompson
//! Sampling, UCB1), segment-sliced bandits, contextual bandits (LinUCB), the
//! simulated reward environment, and regret accounting.

pub mod bandits;
pub mod context;
pub mod contextual;
pub mod policy;
pub mod regret;
pub mod reward;
pub mod segmented;
pub mod simulation;

pub use bandits::MabPolicy;
pub use context::{ContextSampler, Opportunity};
pub use contextual::LinUcbPolicy;
pub use policy::{BanditPolicy, Policy};
pub use regret::RegretAccumulator;
pub use reward::RewardModel;
pub use segmented::{SegmentSampler, SegmentedPolicy};
pub use simulation::{run, run_until, EngineSettings, SimulationDriver, SimulationPlan};
