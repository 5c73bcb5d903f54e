use thiserror::Error;

pub type LiveOpsResult<T> = Result<T, LiveOpsError>;

#[derive(Error, Debug)]
pub enum LiveOpsError {
    /// Malformed campaign, mix, segment or variant data. Fails the run before
    /// any impression is simulated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Simulation already running for campaign {0}")]
    AlreadyRunning(u32),

    /// An `update` that does not match the preceding `choose`.
    #[error("Invalid policy use: {0}")]
    InvalidPolicyUse(String),

    #[error("Transient IO error: {0}")]
    TransientIo(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LiveOpsError {
    /// Only failures at the persistence boundary are worth retrying; everything
    /// raised inside a run is fatal to that run.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LiveOpsError::TransientIo(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        LiveOpsError::Configuration(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        LiveOpsError::InvalidArgument(msg.into())
    }
}
