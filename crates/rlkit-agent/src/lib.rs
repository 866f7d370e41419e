//! On-policy actor-critic training engine for rlkit
//!
//! This crate provides Proximal Policy Optimization built from:
//! - a rollout collector that steps an environment and fills a rollout buffer
//! - a Generalized Advantage Estimation pass over the completed rollout
//! - a clipped-surrogate, multi-epoch minibatch policy optimizer
//! - reference MLP architectures selectable by name through a registry

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod evaluation;
pub mod gae;
pub mod networks;
pub mod optim;
pub mod optimizer;
pub mod ppo;
pub mod registry;
pub mod utils;

// Re-export the agent
pub use config::PPOConfig;
pub use ppo::{
    AgentPhase, IterationStats, PPOAgent, StopHandle, StopReason, TrainingBudget, TrainingReport,
};

// Re-export training components
pub use checkpoint::Checkpoint;
pub use collector::{CollectorConfig, RolloutCollector, RolloutSummary};
pub use evaluation::{evaluate_policy, EvaluationReport};
pub use gae::{compute_gae, normalize_advantages, GaeEstimator};
pub use optim::{Adam, AdamConfig, Sgd};
pub use optimizer::{clipped_surrogate, MinibatchOutcome, OptimizerSettings, PolicyOptimizer, UpdateStats};
pub use utils::{ConstantSchedule, LinearSchedule, Schedule};

// Re-export architectures
pub use networks::{Activation, CategoricalPolicy, GaussianPolicy, MLPConfig, Mlp, MlpValue};
pub use registry::{ArchitectureRegistry, ArchitectureSpec, DefaultArchitectures};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ArchitectureRegistry, EvaluationReport, PPOAgent, PPOConfig, StopHandle, TrainingBudget,
        TrainingReport,
    };
    pub use rlkit_core::prelude::*;
}
