use thiserror::Error;

pub type InsightsResult<T> = Result<T, InsightsError>;

#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Computation overflow: {0}")]
    ComputationOverflow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Result cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl InsightsError {
    /// Errors the engine absorbs into a degraded result instead of returning.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            InsightsError::InsufficientData { .. } | InsightsError::ComputationOverflow(_)
        )
    }
}
