use serde::{Deserialize, Serialize};

/// Root application configuration. Loaded from environment variables
/// with the prefix `LIVEOPS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub contextual: ContextualConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Exploration rule used by the plain and segmented bandits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BanditAlgorithm {
    #[default]
    ThompsonSampling,
    Ucb1,
}

/// Maps a context vector and a variant's weight vector to a click probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkFunction {
    /// `sigmoid(dot(x / |x|, w / |w|))`
    #[default]
    Logistic,
    /// `clamp(dot(x, w) / 7, 0, 1)`
    ScaledDot,
}

/// How contextual impressions draw their feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextDistribution {
    /// Each dimension independently uniform in [0, 1].
    #[default]
    Uniform,
    /// Synthetic player profile (age, sessions, session length, spend,
    /// 3-dim playstyle), scaled into [0, 1].
    PlayerProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_impressions")]
    pub default_impressions: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_seed")]
    pub default_seed: u64,
    #[serde(default)]
    pub algorithm: BanditAlgorithm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextualConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default)]
    pub link: LinkFunction,
    #[serde(default)]
    pub distribution: ContextDistribution,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_impressions_per_run")]
    pub max_impressions_per_run: i64,
}

// Default functions
fn default_impressions() -> i64 {
    1000
}
fn default_batch_size() -> u64 {
    100
}
fn default_seed() -> u64 {
    42
}
fn default_alpha() -> f64 {
    1.0
}
fn default_lambda() -> f64 {
    1.0
}
fn default_max_impressions_per_run() -> i64 {
    1_000_000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_impressions: default_impressions(),
            batch_size: default_batch_size(),
            default_seed: default_seed(),
            algorithm: BanditAlgorithm::default(),
        }
    }
}

impl Default for ContextualConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            lambda: default_lambda(),
            link: LinkFunction::default(),
            distribution: ContextDistribution::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_impressions_per_run: default_max_impressions_per_run(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            contextual: ContextualConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("LIVEOPS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.simulation.default_impressions, 1000);
        assert_eq!(cfg.simulation.batch_size, 100);
        assert_eq!(cfg.simulation.algorithm, BanditAlgorithm::ThompsonSampling);
        assert_eq!(cfg.contextual.link, LinkFunction::Logistic);
        assert_eq!(cfg.contextual.distribution, ContextDistribution::Uniform);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"simulation": {"algorithm": "ucb1"}}"#).unwrap();
        assert_eq!(cfg.simulation.algorithm, BanditAlgorithm::Ucb1);
        assert_eq!(cfg.simulation.default_seed, 42);
        assert!((cfg.contextual.alpha - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.store.max_impressions_per_run, 1_000_000);
    }
}
