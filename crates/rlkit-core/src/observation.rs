//! Observation representations and observation spaces

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for observations from an environment
pub trait Observation: Clone + Debug + Send + Sync {
    /// Convert observation to a feature vector
    fn to_vec(&self) -> Vec<f64>;

    /// Get the shape of the observation
    fn shape(&self) -> Vec<usize>;
}

/// Trait for defining observation spaces
pub trait ObservationSpace: Send + Sync {
    /// The type of observations in this space
    type Observation: Observation;

    /// Check if an observation is valid within this space
    fn contains(&self, obs: &Self::Observation) -> bool;

    /// Get the shape of observations in this space
    fn shape(&self) -> Vec<usize>;

    /// Number of features in a flattened observation
    fn flat_dim(&self) -> usize {
        self.shape().iter().product()
    }
}

/// Vector observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorObservation {
    /// The observation data
    pub data: Vec<f64>,
}

impl VectorObservation {
    /// Wrap a feature vector
    #[must_use]
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }
}

impl Observation for VectorObservation {
    fn to_vec(&self) -> Vec<f64> {
        self.data.clone()
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.data.len()]
    }
}

/// Box observation space
#[derive(Debug, Clone)]
pub struct BoxObservationSpace {
    /// Lower bounds
    pub low: Vec<f64>,
    /// Upper bounds
    pub high: Vec<f64>,
    /// Shape of observations
    pub shape: Vec<usize>,
}

impl BoxObservationSpace {
    /// Create a new box observation space
    pub fn new(low: Vec<f64>, high: Vec<f64>, shape: Vec<usize>) -> crate::Result<Self> {
        let total_size: usize = shape.iter().product();
        if low.len() != total_size || high.len() != total_size {
            return Err(crate::RLError::DimensionMismatch {
                expected: total_size,
                actual: low.len(),
            });
        }
        Ok(Self { low, high, shape })
    }

    /// Unbounded space of flat vectors with `dim` features
    #[must_use]
    pub fn unbounded(dim: usize) -> Self {
        Self {
            low: vec![f64::NEG_INFINITY; dim],
            high: vec![f64::INFINITY; dim],
            shape: vec![dim],
        }
    }
}

impl ObservationSpace for BoxObservationSpace {
    type Observation = VectorObservation;

    fn contains(&self, obs: &Self::Observation) -> bool {
        obs.data.len() == self.low.len()
            && obs
                .data
                .iter()
                .zip(&self.low)
                .zip(&self.high)
                .all(|((x, l), h)| x >= l && x <= h)
    }

    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }
}
