//! Error types for the RL core library

use thiserror::Error;

/// Core error type for RL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Invalid hyperparameter, raised when an agent is constructed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The environment violated its contract (bad shapes, failed step/reset)
    #[error("Environment fault: {0}")]
    EnvironmentFault(String),

    /// Non-finite values in a loss, an advantage or the parameters
    #[error("Numerical instability during {stage}: {detail}")]
    NumericalInstability {
        /// Phase that detected the problem
        stage: String,
        /// What was non-finite
        detail: String,
    },

    /// A rollout buffer was written past its configured length
    #[error("Rollout buffer capacity of {capacity} transitions exceeded")]
    CapacityExceeded {
        /// Configured capacity
        capacity: usize,
    },

    /// A training phase was entered out of order
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),

    /// Invalid action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Required length
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// No architecture registered under the requested name
    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Array shape error
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RLError {
    /// Shorthand for [`RLError::NumericalInstability`]
    pub fn numerical(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NumericalInstability {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error came from the environment and may be retried
    #[must_use]
    pub fn is_environment_fault(&self) -> bool {
        matches!(self, Self::EnvironmentFault(_))
    }
}

/// Result type alias for RL operations
pub type Result<T> = std::result::Result<T, RLError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_fault_classification() {
        assert!(RLError::EnvironmentFault("bad shape".into()).is_environment_fault());
        assert!(!RLError::Configuration("gamma".into()).is_environment_fault());
        assert!(!RLError::CapacityExceeded { capacity: 4 }.is_environment_fault());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = RLError::numerical("optimization", "loss is NaN");
        assert_eq!(
            err.to_string(),
            "Numerical instability during optimization: loss is NaN"
        );
        let err = RLError::CapacityExceeded { capacity: 64 };
        assert!(err.to_string().contains("64"));
    }
}
