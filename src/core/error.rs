use thiserror::Error;

/// Failures that abort a simulation run or a whole Monte Carlo batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("monte carlo batch cancelled")]
    Cancelled,
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }
}

pub type SimResult<T> = Result<T, SimError>;
