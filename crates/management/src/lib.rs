//! LiveOps campaign management: in-memory store for variants, segments,
//! mixes and campaigns, and the simulation service that runs campaigns against
//! it and serves progressive results.

pub mod models;
pub mod runner;
pub mod store;

pub use models::{RunRecord, Scenario, ScenarioVariant, VariantUpdate};
pub use runner::{RunHandle, SimulationRunner};
pub use store::LiveOpsStore;
