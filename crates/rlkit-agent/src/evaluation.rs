//! Policy evaluation on a separate environment, without learning

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rlkit_core::{ActorCritic, Environment, Observation, RLError, Result};

use crate::utils::mean_std;

/// Rewards and lengths of evaluation episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Undiscounted reward of every episode
    pub rewards: Vec<f64>,
    /// Length of every episode
    pub lengths: Vec<usize>,
    /// Mean episode reward
    pub mean_reward: f64,
    /// Standard deviation of the episode reward
    pub std_reward: f64,
    /// Mean episode length
    pub mean_length: f64,
}

impl EvaluationReport {
    fn from_episodes(rewards: Vec<f64>, lengths: Vec<usize>) -> Self {
        let (mean_reward, std_reward) = mean_std(&rewards);
        let mean_length = lengths.iter().sum::<usize>() as f64 / lengths.len().max(1) as f64;
        Self {
            rewards,
            lengths,
            mean_reward,
            std_reward,
            mean_length,
        }
    }
}

/// Run `episodes` full episodes, acting greedily when `deterministic`
///
/// Episodes run until the environment reports `done`; wrap unbounded
/// environments in a time limit.
pub fn evaluate_policy<E: Environment>(
    actor_critic: &ActorCritic<E::Action>,
    env: &mut E,
    episodes: usize,
    deterministic: bool,
    rng: &mut dyn RngCore,
) -> Result<EvaluationReport> {
    if episodes == 0 {
        return Err(RLError::Configuration(
            "evaluation needs at least one episode".into(),
        ));
    }
    let fault = |stage: &str, err: RLError| {
        if err.is_environment_fault() {
            err
        } else {
            RLError::EnvironmentFault(format!("{stage} failed during evaluation: {err}"))
        }
    };

    let mut rewards = Vec::with_capacity(episodes);
    let mut lengths = Vec::with_capacity(episodes);
    for _ in 0..episodes {
        let (mut observation, _) = env.reset().map_err(|e| fault("reset", e))?;
        let mut total_reward = 0.0;
        let mut length = 0;
        loop {
            let features = observation.to_vec();
            let action = if deterministic {
                actor_critic.mode(&features)?
            } else {
                actor_critic.act(&features, rng)?.action
            };
            let step = env.step(action).map_err(|e| fault("step", e))?;
            total_reward += step.reward.value();
            length += 1;
            if step.done {
                break;
            }
            observation = step.observation;
        }
        rewards.push(total_reward);
        lengths.push(length);
    }

    let report = EvaluationReport::from_episodes(rewards, lengths);
    debug!(
        episodes,
        deterministic,
        mean_reward = report.mean_reward,
        mean_length = report.mean_length,
        "evaluation finished"
    );
    Ok(report)
}
