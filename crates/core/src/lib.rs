//! Shared data model, error taxonomy and configuration for the liveops bandit
//! simulation engine.

pub mod config;
pub mod derivation;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{LiveOpsError, LiveOpsResult};
