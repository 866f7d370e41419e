//! Core on-policy reinforcement learning traits and types
//!
//! This crate provides the contracts the training engine is written against:
//! the environment capability, the policy/value/actor-critic interfaces, the
//! rollout buffer, and the gradient optimizer primitive.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod actor_critic;
pub mod agent;
pub mod environment;
pub mod error;
pub mod observation;
pub mod optim;
pub mod policy;
pub mod reward;
pub mod trajectory;
pub mod value;

// Re-export core traits and types
pub use action::{Action, ActionSpace, ContinuousAction, ContinuousSpace, DiscreteAction, DiscreteSpace};
pub use actor_critic::{ActorCritic, Decision, Evaluation, LossGradient};
pub use agent::{Agent, AgentConfig, AgentMetrics};
pub use environment::{Environment, EnvironmentConfig, Episode, Step, StepInfo};
pub use error::{RLError, Result};
pub use observation::{BoxObservationSpace, Observation, ObservationSpace, VectorObservation};
pub use optim::{GradientOptimizer, Gradients};
pub use policy::{PolicyEvaluation, StochasticPolicy};
pub use reward::Reward;
pub use trajectory::{AdvantageTargets, RolloutBuffer, Transition};
pub use value::ValueFunction;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionSpace, ActorCritic, Agent, Environment, Observation, ObservationSpace,
        Result, Reward, RLError, Step, StochasticPolicy, ValueFunction,
    };
}
