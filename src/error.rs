use thiserror::Error;

/// Recoverable conditions raised by the scoring core.
///
/// None of these abort a batch: callers downgrade them to a HOLD signal or
/// skip the offending bar. Only [`ScoringError::Configuration`] raised at
/// startup is meant to stop the process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ScoringError {
    pub fn insufficient(msg: impl Into<String>) -> Self {
        ScoringError::InsufficientData(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ScoringError::InvalidInput(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ScoringError::Configuration(msg.into())
    }

    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, ScoringError::InsufficientData(_))
    }
}
