//! PPO hyperparameters

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use rlkit_core::{AgentConfig, RLError, Result};

/// PPO-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PPOConfig {
    /// Base agent configuration
    #[serde(flatten)]
    pub base: AgentConfig,
    /// Transitions per collection cycle
    pub rollout_length: usize,
    /// GAE lambda
    pub gae_lambda: f64,
    /// Clipping parameter for the probability ratio
    pub clip_ratio: f64,
    /// Optimization passes over each rollout
    pub epochs: usize,
    /// Transitions per gradient step
    pub minibatch_size: usize,
    /// Value loss coefficient
    pub value_coef: f64,
    /// Entropy coefficient
    pub entropy_coef: f64,
    /// Global gradient-norm clip; disabled when `None`
    pub max_grad_norm: Option<f64>,
    /// Normalize advantages
    pub normalize_advantages: bool,
    /// Stop the epoch loop once the approximate KL exceeds this
    pub target_kl: Option<f64>,
    /// Decay the learning rate linearly to zero over each `learn` call
    pub anneal_learning_rate: bool,
    /// End a rollout at the first episode boundary
    pub stop_at_episode_end: bool,
    /// Bootstrap time-limit truncations from the value function
    pub bootstrap_truncated: bool,
    /// Consecutive environment faults tolerated before giving up
    pub max_environment_retries: usize,
    /// Episodes in the running reward mean
    pub stats_window: usize,
}

impl Default for PPOConfig {
    fn default() -> Self {
        Self {
            base: AgentConfig::default(),
            rollout_length: 2048,
            gae_lambda: 0.95,
            clip_ratio: 0.2,
            epochs: 10,
            minibatch_size: 64,
            value_coef: 0.5,
            entropy_coef: 0.01,
            max_grad_norm: Some(0.5),
            normalize_advantages: true,
            target_kl: None,
            anneal_learning_rate: false,
            stop_at_episode_end: false,
            bootstrap_truncated: false,
            max_environment_retries: 3,
            stats_window: 100,
        }
    }
}

fn invalid(message: impl Into<String>) -> RLError {
    RLError::Configuration(message.into())
}

fn require_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(format!("{name} must be finite and non-negative, got {value}")));
    }
    Ok(())
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(format!("{name} must be finite and positive, got {value}")));
    }
    Ok(())
}

impl PPOConfig {
    /// Check every hyperparameter; the first violation is reported
    pub fn validate(&self) -> Result<()> {
        if self.rollout_length == 0 {
            return Err(invalid("rollout_length must be at least 1"));
        }
        if self.minibatch_size == 0 {
            return Err(invalid("minibatch_size must be at least 1"));
        }
        if self.rollout_length % self.minibatch_size != 0 {
            return Err(invalid(format!(
                "minibatch_size {} does not divide rollout_length {}",
                self.minibatch_size, self.rollout_length
            )));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs must be at least 1"));
        }
        let gamma = self.base.gamma;
        if !(gamma > 0.0 && gamma <= 1.0) {
            return Err(invalid(format!("gamma must be in (0, 1], got {gamma}")));
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(invalid(format!(
                "gae_lambda must be in [0, 1], got {}",
                self.gae_lambda
            )));
        }
        if !(self.clip_ratio > 0.0 && self.clip_ratio < 1.0) {
            return Err(invalid(format!(
                "clip_ratio must be in (0, 1), got {}",
                self.clip_ratio
            )));
        }
        require_positive("learning_rate", self.base.learning_rate)?;
        require_non_negative("value_coef", self.value_coef)?;
        require_non_negative("entropy_coef", self.entropy_coef)?;
        if let Some(norm) = self.max_grad_norm {
            require_positive("max_grad_norm", norm)?;
        }
        if let Some(kl) = self.target_kl {
            require_positive("target_kl", kl)?;
        }
        if self.stats_window == 0 {
            return Err(invalid("stats_window must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration; missing keys take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read PPO config {}", path.display()))?;
        Self::from_json_str(&json)
    }
}
