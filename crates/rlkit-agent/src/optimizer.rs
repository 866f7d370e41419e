//! Clipped-surrogate policy optimization over a completed rollout

use rand::seq::SliceRandom;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use rlkit_core::{
    Action, ActorCritic, GradientOptimizer, Gradients, LossGradient, RLError, Result,
    RolloutBuffer,
};

use crate::config::PPOConfig;
use crate::utils::explained_variance;

/// Per-sample PPO policy loss `-min(r * A, clip(r, 1 - c, 1 + c) * A)`
#[must_use]
pub fn clipped_surrogate(ratio: f64, advantage: f64, clip_ratio: f64) -> f64 {
    let unclipped = ratio * advantage;
    let clipped = ratio.clamp(1.0 - clip_ratio, 1.0 + clip_ratio) * advantage;
    -unclipped.min(clipped)
}

/// Subset of [`PPOConfig`] the update step needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSettings {
    /// Ratio clip
    pub clip_ratio: f64,
    /// Passes over the rollout
    pub epochs: usize,
    /// Transitions per gradient step
    pub minibatch_size: usize,
    /// Value loss weight
    pub value_coef: f64,
    /// Entropy bonus weight
    pub entropy_coef: f64,
    /// Global gradient-norm clip
    pub max_grad_norm: Option<f64>,
    /// Early-stop threshold on the per-epoch approximate KL
    pub target_kl: Option<f64>,
}

impl From<&PPOConfig> for OptimizerSettings {
    fn from(config: &PPOConfig) -> Self {
        Self {
            clip_ratio: config.clip_ratio,
            epochs: config.epochs,
            minibatch_size: config.minibatch_size,
            value_coef: config.value_coef,
            entropy_coef: config.entropy_coef,
            max_grad_norm: config.max_grad_norm,
            target_kl: config.target_kl,
        }
    }
}

/// Losses and gradients of one minibatch at the current parameters
#[derive(Debug, Clone)]
pub struct MinibatchOutcome {
    /// `exp(new_log_prob - old_log_prob)` per sample, in minibatch order
    pub ratios: Vec<f64>,
    /// Mean clipped-surrogate loss
    pub policy_loss: f64,
    /// Mean squared error against the return targets
    pub value_loss: f64,
    /// Mean policy entropy
    pub entropy: f64,
    /// `policy_loss + value_coef * value_loss - entropy_coef * entropy`
    pub loss: f64,
    /// Mean of `(r - 1) - ln r`, a non-negative KL estimate
    pub approx_kl: f64,
    /// Fraction of samples whose ratio left the clip range
    pub clip_fraction: f64,
    /// Gradient of `loss`
    pub gradients: Gradients,
}

/// Aggregated diagnostics of one optimization phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStats {
    /// Mean policy loss over minibatch steps
    pub policy_loss: f64,
    /// Mean value loss over minibatch steps
    pub value_loss: f64,
    /// Mean entropy over minibatch steps
    pub entropy: f64,
    /// Mean combined loss over minibatch steps
    pub total_loss: f64,
    /// Mean approximate KL over minibatch steps
    pub approx_kl: f64,
    /// Mean clip fraction over minibatch steps
    pub clip_fraction: f64,
    /// Explained variance of the collected values w.r.t. the returns
    pub explained_variance: f64,
    /// Mean gradient norm before clipping
    pub grad_norm: f64,
    /// Epochs run to completion
    pub epochs_completed: usize,
    /// Gradient steps applied
    pub gradient_steps: usize,
    /// Whether `target_kl` cut the epoch loop short
    pub early_stopped: bool,
}

#[derive(Debug, Default)]
struct Accumulator {
    policy_loss: f64,
    value_loss: f64,
    entropy: f64,
    total_loss: f64,
    approx_kl: f64,
    clip_fraction: f64,
    grad_norm: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, outcome: &MinibatchOutcome, grad_norm: f64) {
        self.policy_loss += outcome.policy_loss;
        self.value_loss += outcome.value_loss;
        self.entropy += outcome.entropy;
        self.total_loss += outcome.loss;
        self.approx_kl += outcome.approx_kl;
        self.clip_fraction += outcome.clip_fraction;
        self.grad_norm += grad_norm;
        self.count += 1;
    }

    fn mean_kl(&self) -> f64 {
        self.approx_kl / self.count.max(1) as f64
    }

    fn merge(&mut self, other: &Self) {
        self.policy_loss += other.policy_loss;
        self.value_loss += other.value_loss;
        self.entropy += other.entropy;
        self.total_loss += other.total_loss;
        self.approx_kl += other.approx_kl;
        self.clip_fraction += other.clip_fraction;
        self.grad_norm += other.grad_norm;
        self.count += other.count;
    }
}

/// Runs the multi-epoch minibatch update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyOptimizer {
    settings: OptimizerSettings,
}

impl PolicyOptimizer {
    /// Create an optimizer
    #[must_use]
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }

    /// Settings in use
    #[must_use]
    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    /// Losses, ratios and gradients for `indices` without touching parameters
    ///
    /// Old log-probabilities come from the buffer and are never refreshed.
    pub fn evaluate_minibatch<A: Action>(
        &self,
        actor_critic: &ActorCritic<A>,
        buffer: &RolloutBuffer<A>,
        indices: &[usize],
    ) -> Result<MinibatchOutcome> {
        let targets = buffer.targets().ok_or_else(|| {
            RLError::InvalidPhase("optimization requires computed advantages".into())
        })?;
        if indices.is_empty() {
            return Err(RLError::InvalidPhase("empty minibatch".into()));
        }
        let transitions = buffer.transitions();
        let advantages = targets.policy_advantages();
        let returns = targets.returns();
        let n = indices.len() as f64;
        let OptimizerSettings {
            clip_ratio,
            value_coef,
            entropy_coef,
            ..
        } = self.settings;

        let mut gradients = actor_critic.zero_gradients();
        let mut ratios = Vec::with_capacity(indices.len());
        let (mut policy_loss, mut value_loss, mut entropy) = (0.0, 0.0, 0.0);
        let (mut approx_kl, mut clipped) = (0.0, 0usize);

        for &i in indices {
            let transition = transitions.get(i).ok_or_else(|| {
                RLError::Computation(format!("minibatch index {i} outside rollout of {}", transitions.len()))
            })?;
            let eval = actor_critic.evaluate(&transition.observation, &transition.action)?;
            let log_ratio = eval.log_prob - transition.log_prob;
            let ratio = log_ratio.exp();
            let advantage = advantages[i];

            let unclipped = ratio * advantage;
            let clipped_term = ratio.clamp(1.0 - clip_ratio, 1.0 + clip_ratio) * advantage;
            policy_loss += -unclipped.min(clipped_term);
            // the clipped branch is constant in the parameters
            let d_log_prob = if unclipped <= clipped_term {
                -advantage * ratio / n
            } else {
                0.0
            };

            let error = eval.value - returns[i];
            value_loss += error * error;
            entropy += eval.entropy;

            let loss_gradient = LossGradient {
                d_log_prob,
                d_value: value_coef * 2.0 * error / n,
                d_entropy: -entropy_coef / n,
            };
            actor_critic.backward(
                &transition.observation,
                &transition.action,
                &loss_gradient,
                &mut gradients,
            )?;

            approx_kl += (ratio - 1.0) - log_ratio;
            if (ratio - 1.0).abs() > clip_ratio {
                clipped += 1;
            }
            ratios.push(ratio);
        }

        let policy_loss = policy_loss / n;
        let value_loss = value_loss / n;
        let entropy = entropy / n;
        Ok(MinibatchOutcome {
            ratios,
            policy_loss,
            value_loss,
            entropy,
            loss: policy_loss + value_coef * value_loss - entropy_coef * entropy,
            approx_kl: approx_kl / n,
            clip_fraction: clipped as f64 / n,
            gradients,
        })
    }

    /// Run `epochs` shuffled passes of minibatch gradient steps
    ///
    /// Fails with `NumericalInstability` as soon as a loss, a gradient or an
    /// updated parameter is non-finite; parameters may already hold the
    /// offending update at that point.
    pub fn optimize<A: Action>(
        &self,
        actor_critic: &mut ActorCritic<A>,
        optimizer: &mut dyn GradientOptimizer,
        buffer: &RolloutBuffer<A>,
        rng: &mut dyn RngCore,
    ) -> Result<UpdateStats> {
        let targets = buffer.targets().ok_or_else(|| {
            RLError::InvalidPhase("optimization requires computed advantages".into())
        })?;
        let values: Vec<f64> = buffer.transitions().iter().map(|t| t.value).collect();
        let explained_variance = explained_variance(&values, targets.returns());

        let mut indices: Vec<usize> = (0..buffer.len()).collect();
        let mut total = Accumulator::default();
        let mut stats = UpdateStats {
            explained_variance,
            ..UpdateStats::default()
        };

        for epoch in 0..self.settings.epochs {
            indices.shuffle(rng);
            let mut epoch_acc = Accumulator::default();

            for minibatch in indices.chunks(self.settings.minibatch_size) {
                let mut outcome = self.evaluate_minibatch(actor_critic, buffer, minibatch)?;
                if !outcome.loss.is_finite() {
                    error!(epoch, loss = outcome.loss, "non-finite loss");
                    return Err(RLError::numerical(
                        "policy optimization",
                        format!("loss is {} in epoch {epoch}", outcome.loss),
                    ));
                }
                if !outcome.gradients.is_finite() {
                    error!(epoch, "non-finite gradients");
                    return Err(RLError::numerical(
                        "policy optimization",
                        format!("gradients are non-finite in epoch {epoch}"),
                    ));
                }

                let grad_norm = match self.settings.max_grad_norm {
                    Some(max_norm) => outcome.gradients.clip_norm(max_norm),
                    None => outcome.gradients.norm(),
                };
                actor_critic.apply_gradients(optimizer, &outcome.gradients)?;
                if !actor_critic.parameters_finite() {
                    error!(epoch, grad_norm, "parameters became non-finite");
                    return Err(RLError::numerical(
                        "parameter update",
                        format!("non-finite parameters after a step in epoch {epoch}"),
                    ));
                }
                epoch_acc.add(&outcome, grad_norm);
            }

            stats.epochs_completed += 1;
            let epoch_kl = epoch_acc.mean_kl();
            debug!(
                epoch,
                approx_kl = epoch_kl,
                loss = epoch_acc.total_loss / epoch_acc.count.max(1) as f64,
                "epoch finished"
            );
            total.merge(&epoch_acc);

            if let Some(target_kl) = self.settings.target_kl {
                if epoch_kl > target_kl {
                    debug!(epoch, approx_kl = epoch_kl, target_kl, "early stop on KL");
                    stats.early_stopped = true;
                    break;
                }
            }
        }

        let count = total.count.max(1) as f64;
        stats.policy_loss = total.policy_loss / count;
        stats.value_loss = total.value_loss / count;
        stats.entropy = total.entropy / count;
        stats.total_loss = total.total_loss / count;
        stats.approx_kl = total.approx_kl / count;
        stats.clip_fraction = total.clip_fraction / count;
        stats.grad_norm = total.grad_norm / count;
        stats.gradient_steps = total.count;
        Ok(stats)
    }
}
