//! Policy contract for action selection

use ndarray::Array1;
use rand::RngCore;

use crate::Action;

/// Log-probability and entropy of a policy at one observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyEvaluation {
    /// Log probability of the evaluated action
    pub log_prob: f64,
    /// Entropy of the action distribution
    pub entropy: f64,
}

/// Stochastic policy that samples actions from a distribution
///
/// Implementations own a flat parameter vector and can differentiate their
/// log-probability and entropy with respect to it. The training engine never
/// looks inside the architecture; it only calls these methods.
pub trait StochasticPolicy: Send + Sync {
    /// Action type
    type Action: Action;

    /// Sample an action, returning it with its log probability
    fn sample(
        &self,
        observation: &[f64],
        rng: &mut dyn RngCore,
    ) -> crate::Result<(Self::Action, f64)>;

    /// Most likely action (greedy / mean action)
    fn mode(&self, observation: &[f64]) -> crate::Result<Self::Action>;

    /// Get the log probability of an action given an observation
    fn log_prob(&self, observation: &[f64], action: &Self::Action) -> crate::Result<f64>;

    /// Get the entropy of the policy distribution for an observation
    fn entropy(&self, observation: &[f64]) -> crate::Result<f64>;

    /// Log probability and entropy in one pass
    fn evaluate(
        &self,
        observation: &[f64],
        action: &Self::Action,
    ) -> crate::Result<PolicyEvaluation> {
        Ok(PolicyEvaluation {
            log_prob: self.log_prob(observation, action)?,
            entropy: self.entropy(observation)?,
        })
    }

    /// Accumulate `d_log_prob * ∇log π(a|s) + d_entropy * ∇H(s)` into `grad`
    fn backward(
        &self,
        observation: &[f64],
        action: &Self::Action,
        d_log_prob: f64,
        d_entropy: f64,
        grad: &mut Array1<f64>,
    ) -> crate::Result<()>;

    /// Trainable parameters
    fn parameters(&self) -> &Array1<f64>;

    /// Mutable trainable parameters
    fn parameters_mut(&mut self) -> &mut Array1<f64>;
}
