//! Action representations and action spaces

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for actions in an RL environment
pub trait Action: Clone + Debug + Send + Sync {
    /// Convert action to a vector representation
    fn to_vec(&self) -> Vec<f64>;
}

/// Trait for defining action spaces
pub trait ActionSpace: Send + Sync {
    /// The type of actions in this space
    type Action: Action;

    /// Sample a random action from the space
    fn sample(&self, rng: &mut dyn RngCore) -> Self::Action;

    /// Check if an action is valid within this space
    fn contains(&self, action: &Self::Action) -> bool;

    /// Width of the policy head needed for this space: the number of
    /// choices for discrete spaces, the number of dimensions otherwise
    fn num_outputs(&self) -> usize;
}

/// Discrete action (e.g., for discrete action spaces)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscreteAction(pub usize);

impl Action for DiscreteAction {
    fn to_vec(&self) -> Vec<f64> {
        vec![self.0 as f64]
    }
}

/// Continuous action (e.g., for continuous control)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousAction(pub Vec<f64>);

impl Action for ContinuousAction {
    fn to_vec(&self) -> Vec<f64> {
        self.0.clone()
    }
}

/// Discrete action space
#[derive(Debug, Clone)]
pub struct DiscreteSpace {
    /// Number of discrete actions
    pub n: usize,
}

impl DiscreteSpace {
    /// Create a new discrete action space
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl ActionSpace for DiscreteSpace {
    type Action = DiscreteAction;

    fn sample(&self, rng: &mut dyn RngCore) -> Self::Action {
        DiscreteAction(rng.gen_range(0..self.n))
    }

    fn contains(&self, action: &Self::Action) -> bool {
        action.0 < self.n
    }

    fn num_outputs(&self) -> usize {
        self.n
    }
}

/// Continuous action space (box)
///
/// Gaussian policies are unbounded, so `contains` only checks the
/// dimensionality; environments clip to `low`/`high` themselves.
#[derive(Debug, Clone)]
pub struct ContinuousSpace {
    /// Lower bounds for each dimension
    pub low: Vec<f64>,
    /// Upper bounds for each dimension
    pub high: Vec<f64>,
}

impl ContinuousSpace {
    /// Create a new continuous action space
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> crate::Result<Self> {
        if low.len() != high.len() {
            return Err(crate::RLError::DimensionMismatch {
                expected: low.len(),
                actual: high.len(),
            });
        }
        Ok(Self { low, high })
    }

    /// Clip an action into the bounds of this space
    #[must_use]
    pub fn clip(&self, action: &ContinuousAction) -> ContinuousAction {
        ContinuousAction(
            action
                .0
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .map(|(x, (l, h))| x.clamp(*l, *h))
                .collect(),
        )
    }
}

impl ActionSpace for ContinuousSpace {
    type Action = ContinuousAction;

    fn sample(&self, rng: &mut dyn RngCore) -> Self::Action {
        let values: Vec<f64> = self
            .low
            .iter()
            .zip(&self.high)
            .map(|(l, h)| rng.gen_range(*l..*h))
            .collect();

        ContinuousAction(values)
    }

    fn contains(&self, action: &Self::Action) -> bool {
        action.0.len() == self.low.len() && action.0.iter().all(|x| x.is_finite())
    }

    fn num_outputs(&self) -> usize {
        self.low.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_discrete_space() {
        let space = DiscreteSpace::new(3);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(space.contains(&space.sample(&mut rng)));
        }
        assert!(!space.contains(&DiscreteAction(3)));
        assert_eq!(space.num_outputs(), 3);
    }

    #[test]
    fn test_continuous_space_clip() {
        let space = ContinuousSpace::new(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap();
        let clipped = space.clip(&ContinuousAction(vec![-3.0, 1.5]));
        assert_eq!(clipped, ContinuousAction(vec![-1.0, 1.5]));
        assert!(space.contains(&clipped));
        assert!(!space.contains(&ContinuousAction(vec![f64::NAN, 0.0])));
        assert_eq!(space.num_outputs(), 2);
    }
}
