//! Actor-critic pairing of a stochastic policy with a state-value function

use ndarray::Array1;
use rand::RngCore;

use crate::{Action, GradientOptimizer, Gradients, RLError, StochasticPolicy, ValueFunction};

/// What the actor-critic decided at one observation during collection
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<A> {
    /// Sampled action
    pub action: A,
    /// Log probability of `action` under the acting policy
    pub log_prob: f64,
    /// Value estimate of the observation
    pub value: f64,
}

/// Re-evaluation of a recorded action under the current parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Log probability of the recorded action
    pub log_prob: f64,
    /// Current value estimate
    pub value: f64,
    /// Entropy of the action distribution
    pub entropy: f64,
}

/// Sensitivities of a scalar loss to the three actor-critic outputs
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossGradient {
    /// ∂L/∂log π(a|s)
    pub d_log_prob: f64,
    /// ∂L/∂V(s)
    pub d_value: f64,
    /// ∂L/∂H(s)
    pub d_entropy: f64,
}

/// Policy plus value function, trained jointly
pub struct ActorCritic<A> {
    policy: Box<dyn StochasticPolicy<Action = A>>,
    value: Box<dyn ValueFunction>,
}

impl<A: Action> ActorCritic<A> {
    /// Pair a policy with a value function
    pub fn new(
        policy: Box<dyn StochasticPolicy<Action = A>>,
        value: Box<dyn ValueFunction>,
    ) -> Self {
        Self { policy, value }
    }

    /// Sample an action and report its log probability and the state value
    pub fn act(&self, observation: &[f64], rng: &mut dyn RngCore) -> crate::Result<Decision<A>> {
        let (action, log_prob) = self.policy.sample(observation, rng)?;
        let value = self.value.value(observation)?;
        Ok(Decision {
            action,
            log_prob,
            value,
        })
    }

    /// Log probability, value and entropy for a recorded action
    pub fn evaluate(&self, observation: &[f64], action: &A) -> crate::Result<Evaluation> {
        let policy_eval = self.policy.evaluate(observation, action)?;
        let value = self.value.value(observation)?;
        Ok(Evaluation {
            log_prob: policy_eval.log_prob,
            value,
            entropy: policy_eval.entropy,
        })
    }

    /// State-value estimate
    pub fn value(&self, observation: &[f64]) -> crate::Result<f64> {
        self.value.value(observation)
    }

    /// Greedy action
    pub fn mode(&self, observation: &[f64]) -> crate::Result<A> {
        self.policy.mode(observation)
    }

    /// Zeroed gradient buffers sized for this actor-critic
    #[must_use]
    pub fn zero_gradients(&self) -> Gradients {
        Gradients::zeros(
            self.policy.parameters().len(),
            self.value.parameters().len(),
        )
    }

    /// Backpropagate one sample's loss sensitivities into `grads`
    pub fn backward(
        &self,
        observation: &[f64],
        action: &A,
        loss: &LossGradient,
        grads: &mut Gradients,
    ) -> crate::Result<()> {
        if loss.d_log_prob != 0.0 || loss.d_entropy != 0.0 {
            self.policy.backward(
                observation,
                action,
                loss.d_log_prob,
                loss.d_entropy,
                &mut grads.policy,
            )?;
        }
        if loss.d_value != 0.0 {
            self.value.backward(observation, loss.d_value, &mut grads.value)?;
        }
        Ok(())
    }

    /// Hand both parameter groups to an optimizer primitive
    pub fn apply_gradients(
        &mut self,
        optimizer: &mut dyn GradientOptimizer,
        grads: &Gradients,
    ) -> crate::Result<()> {
        if grads.policy.len() != self.policy.parameters().len() {
            return Err(RLError::DimensionMismatch {
                expected: self.policy.parameters().len(),
                actual: grads.policy.len(),
            });
        }
        if grads.value.len() != self.value.parameters().len() {
            return Err(RLError::DimensionMismatch {
                expected: self.value.parameters().len(),
                actual: grads.value.len(),
            });
        }
        let mut params = [self.policy.parameters_mut(), self.value.parameters_mut()];
        optimizer.apply_gradients(&mut params, &[&grads.policy, &grads.value])
    }

    /// Policy parameters
    #[must_use]
    pub fn policy_parameters(&self) -> &Array1<f64> {
        self.policy.parameters()
    }

    /// Value parameters
    #[must_use]
    pub fn value_parameters(&self) -> &Array1<f64> {
        self.value.parameters()
    }

    /// Both parameter groups, mutably (policy first)
    pub fn parameters_mut(&mut self) -> [&mut Array1<f64>; 2] {
        [self.policy.parameters_mut(), self.value.parameters_mut()]
    }

    /// Total number of trainable scalars
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.policy.parameters().len() + self.value.parameters().len()
    }

    /// Whether every parameter is finite
    #[must_use]
    pub fn parameters_finite(&self) -> bool {
        self.policy
            .parameters()
            .iter()
            .chain(self.value.parameters().iter())
            .all(|p| p.is_finite())
    }
}

impl<A: Action> std::fmt::Debug for ActorCritic<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorCritic")
            .field("policy_parameters", &self.policy.parameters().len())
            .field("value_parameters", &self.value.parameters().len())
            .finish()
    }
}
