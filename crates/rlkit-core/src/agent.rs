//! Agent traits and shared configuration/metrics types

use serde::{Deserialize, Serialize};

use crate::{Action, Observation};

/// Configuration shared by all agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Discount factor
    pub gamma: f64,
    /// Seed for parameter init, sampling and shuffling; OS entropy when absent
    pub seed: Option<u64>,
    /// Emit a progress log every N iterations
    pub log_interval: usize,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            gamma: 0.99,
            seed: None,
            log_interval: 1,
            params: serde_json::Map::new(),
        }
    }
}

/// Core agent trait
pub trait Agent: Send {
    /// Observation type
    type Observation: Observation;
    /// Action type
    type Action: Action;
    /// Summary returned by a training run
    type Report;

    /// Select an action for an observation, greedily when `deterministic`
    fn act(
        &mut self,
        observation: &Self::Observation,
        deterministic: bool,
    ) -> crate::Result<Self::Action>;

    /// Train for `total_timesteps` environment steps
    fn learn(&mut self, total_timesteps: usize) -> crate::Result<Self::Report>;

    /// Save the agent
    fn save(&self, path: &std::path::Path) -> crate::Result<()>;

    /// Load the agent
    fn load(&mut self, path: &std::path::Path) -> crate::Result<()>;

    /// Get agent metrics
    fn metrics(&self) -> AgentMetrics {
        AgentMetrics::default()
    }
}

/// Agent metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Total steps taken
    pub total_steps: usize,
    /// Total episodes
    pub total_episodes: usize,
    /// Completed training iterations
    pub total_iterations: usize,
    /// Average reward per episode over the recent window
    pub avg_episode_reward: f64,
    /// Loss value
    pub loss: Option<f64>,
    /// Additional metrics
    #[serde(flatten)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}
