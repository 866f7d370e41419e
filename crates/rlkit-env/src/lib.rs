//! Reference reinforcement learning environments for rlkit
//!
//! This crate provides:
//! - A deterministic two-state goal task for end-to-end checks
//! - Classic control environments (CartPole, Mountain Car)
//! - Wrappers for time limits and reward shaping

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classic;
pub mod goal;
pub mod wrappers;

// Re-export environments
pub use classic::{CartPoleEnv, ContinuousMountainCarEnv, MountainCarEnv};
pub use goal::{GoalEnv, ADVANCE, GOAL_MAX_STEPS, STAY};
pub use wrappers::{RewardWrapper, TimeLimit};

// Re-export core types
pub use rlkit_core::{
    Action, ActionSpace, Environment, EnvironmentConfig, Episode, Observation, ObservationSpace,
    Reward, Step,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{CartPoleEnv, GoalEnv, MountainCarEnv, RewardWrapper, TimeLimit};
    pub use rlkit_core::prelude::*;
}
