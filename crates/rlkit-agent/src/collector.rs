//! Rollout collection: drives the environment and fills the rollout buffer

use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::{debug, trace};
use uuid::Uuid;

use rlkit_core::{
    ActionSpace, ActorCritic, Environment, Episode, Observation, RLError, Result, RolloutBuffer,
    Transition,
};

/// Collection behaviour knobs taken from the agent configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectorConfig {
    /// Discount used when bootstrapping time-limit truncations
    pub gamma: f64,
    /// Fold `gamma * V(final observation)` into truncated steps' rewards
    pub bootstrap_truncated: bool,
    /// End the rollout at the first episode boundary instead of filling the buffer
    pub stop_at_episode_end: bool,
}

/// Outcome of one collection cycle
#[derive(Debug, Clone)]
pub struct RolloutSummary {
    /// Transitions recorded
    pub steps: usize,
    /// Episodes that finished during this rollout
    pub episodes: Vec<Episode>,
    /// V of the observation after the last transition; 0 if that transition was terminal
    pub bootstrap_value: f64,
    /// Whether the rollout stopped inside an episode
    pub ended_mid_episode: bool,
}

#[derive(Debug, Clone)]
struct EpisodeTracker {
    id: Uuid,
    start_time: DateTime<Utc>,
    total_reward: f64,
    steps: usize,
}

impl EpisodeTracker {
    fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            total_reward: 0.0,
            steps: 0,
        }
    }

    fn finish(self, truncated: bool) -> Episode {
        Episode {
            id: self.id.to_string(),
            total_reward: self.total_reward,
            steps: self.steps,
            truncated,
            start_time: self.start_time,
            end_time: Some(Utc::now()),
        }
    }
}

fn environment_fault(context: &str, err: RLError) -> RLError {
    if err.is_environment_fault() {
        err
    } else {
        RLError::EnvironmentFault(format!("{context}: {err}"))
    }
}

/// Steps one environment with an actor-critic and records transitions
///
/// The collector owns the environment and the in-progress episode, so an
/// episode may span several rollouts. After a fault the environment is reset
/// before the next step and the interrupted episode is dropped.
pub struct RolloutCollector<E: Environment> {
    env: E,
    action_space: Box<dyn ActionSpace<Action = E::Action>>,
    observation_shape: Vec<usize>,
    config: CollectorConfig,
    current: Option<Vec<f64>>,
    episode: Option<EpisodeTracker>,
    total_steps: usize,
}

impl<E: Environment> RolloutCollector<E> {
    /// Wrap an environment; its spaces are captured once and assumed fixed
    pub fn new(env: E, config: CollectorConfig) -> Self {
        let action_space = env.action_space();
        let observation_shape = env.observation_space().shape();
        Self {
            env,
            action_space,
            observation_shape,
            config,
            current: None,
            episode: None,
            total_steps: 0,
        }
    }

    /// Flattened observation length
    #[must_use]
    pub fn observation_dim(&self) -> usize {
        self.observation_shape.iter().product()
    }

    /// Policy outputs required by the action space
    #[must_use]
    pub fn action_dim(&self) -> usize {
        self.action_space.num_outputs()
    }

    /// Environment steps taken over the collector's lifetime
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Borrow the environment
    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Mutably borrow the environment; the next step starts with a reset
    pub fn environment_mut(&mut self) -> &mut E {
        self.invalidate();
        &mut self.env
    }

    /// Release the environment
    pub fn into_inner(self) -> E {
        self.env
    }

    /// Abandon the current episode; the environment is reset before the next step
    pub fn invalidate(&mut self) {
        self.current = None;
        self.episode = None;
    }

    fn validate(&self, observation: &E::Observation) -> Result<Vec<f64>> {
        if observation.shape() != self.observation_shape {
            return Err(RLError::EnvironmentFault(format!(
                "observation shape {:?} does not match declared {:?}",
                observation.shape(),
                self.observation_shape
            )));
        }
        let features = observation.to_vec();
        if features.len() != self.observation_dim() {
            return Err(RLError::EnvironmentFault(format!(
                "observation has {} features, expected {}",
                features.len(),
                self.observation_dim()
            )));
        }
        if let Some(i) = features.iter().position(|f| !f.is_finite()) {
            return Err(RLError::EnvironmentFault(format!(
                "observation feature {i} is {}",
                features[i]
            )));
        }
        Ok(features)
    }

    fn current_observation(&mut self) -> Result<Vec<f64>> {
        if let Some(observation) = &self.current {
            return Ok(observation.clone());
        }
        let (observation, _info) = self
            .env
            .reset()
            .map_err(|e| environment_fault("reset failed", e))?;
        let features = self.validate(&observation)?;
        self.current = Some(features.clone());
        self.episode = Some(EpisodeTracker::start());
        Ok(features)
    }

    /// Fill `buffer` from the environment under the current policy
    ///
    /// On error the buffer may hold a partial rollout; the caller must clear
    /// it and not estimate from it.
    pub fn collect(
        &mut self,
        actor_critic: &ActorCritic<E::Action>,
        buffer: &mut RolloutBuffer<E::Action>,
        rng: &mut dyn RngCore,
    ) -> Result<RolloutSummary> {
        if !buffer.is_empty() {
            return Err(RLError::InvalidPhase(
                "collection requires an empty rollout buffer".into(),
            ));
        }
        let result = self.fill(actor_critic, buffer, rng);
        if let Err(err) = &result {
            if err.is_environment_fault() {
                self.invalidate();
            }
        }
        result
    }

    fn fill(
        &mut self,
        actor_critic: &ActorCritic<E::Action>,
        buffer: &mut RolloutBuffer<E::Action>,
        rng: &mut dyn RngCore,
    ) -> Result<RolloutSummary> {
        let mut episodes = Vec::new();

        while !buffer.is_full() {
            let observation = self.current_observation()?;
            let decision = actor_critic.act(&observation, rng)?;
            if !self.action_space.contains(&decision.action) {
                return Err(RLError::InvalidAction(format!(
                    "policy produced {:?} outside the action space",
                    decision.action
                )));
            }

            let step = self
                .env
                .step(decision.action.clone())
                .map_err(|e| environment_fault("step failed", e))?;
            let next_observation = self.validate(&step.observation)?;
            let raw_reward = step.reward.value();
            if !raw_reward.is_finite() {
                return Err(RLError::EnvironmentFault(format!("reward is {raw_reward}")));
            }
            self.total_steps += 1;

            let mut reward = raw_reward;
            if step.truncated && self.config.bootstrap_truncated {
                reward += self.config.gamma * actor_critic.value(&next_observation)?;
            }

            buffer.record(Transition {
                observation,
                action: decision.action,
                log_prob: decision.log_prob,
                reward,
                done: step.done,
                value: decision.value,
            })?;

            let tracker = self.episode.get_or_insert_with(EpisodeTracker::start);
            tracker.total_reward += raw_reward;
            tracker.steps += 1;

            if step.done {
                if let Some(tracker) = self.episode.take() {
                    let episode = tracker.finish(step.truncated);
                    trace!(
                        reward = episode.total_reward,
                        steps = episode.steps,
                        truncated = episode.truncated,
                        "episode finished"
                    );
                    episodes.push(episode);
                }
                self.current = None;
                if self.config.stop_at_episode_end {
                    break;
                }
            } else {
                self.current = Some(next_observation);
            }
        }

        let last_done = buffer.last().map_or(true, |t| t.done);
        let bootstrap_value = match (&self.current, last_done) {
            (Some(observation), false) => actor_critic.value(observation)?,
            _ => 0.0,
        };

        debug!(
            steps = buffer.len(),
            episodes = episodes.len(),
            bootstrap_value,
            "rollout collected"
        );
        Ok(RolloutSummary {
            steps: buffer.len(),
            episodes,
            bootstrap_value,
            ended_mid_episode: !last_done,
        })
    }
}

impl<E: Environment + std::fmt::Debug> std::fmt::Debug for RolloutCollector<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RolloutCollector")
            .field("env", &self.env)
            .field("observation_shape", &self.observation_shape)
            .field("config", &self.config)
            .field("total_steps", &self.total_steps)
            .finish()
    }
}
