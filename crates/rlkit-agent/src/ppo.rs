//! Proximal Policy Optimization (PPO) agent
//!
//! [`PPOAgent`] owns the environment, the actor-critic, the rollout buffer and
//! all counters. Each iteration runs collect, estimate, optimize and clear in
//! strict sequence on the calling thread.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use rlkit_core::{
    ActorCritic, Agent, AgentMetrics, Environment, Episode, GradientOptimizer, Observation,
    RLError, Result, RolloutBuffer,
};

use crate::checkpoint::{Checkpoint, CHECKPOINT_VERSION};
use crate::collector::{CollectorConfig, RolloutCollector, RolloutSummary};
use crate::config::PPOConfig;
use crate::evaluation::{evaluate_policy, EvaluationReport};
use crate::gae::GaeEstimator;
use crate::optim::Adam;
use crate::optimizer::{OptimizerSettings, PolicyOptimizer, UpdateStats};
use crate::registry::{ArchitectureRegistry, ArchitectureSpec, DefaultArchitectures};
use crate::utils::{LinearSchedule, Schedule};

/// Offset between the initialization seed and the sampling/shuffling stream
const SAMPLING_SEED_OFFSET: u64 = 0x5DEE_CE66_D;

/// Offset of the stream used by `evaluate` and stochastic `act`
const INFERENCE_SEED_OFFSET: u64 = 0xB5AD_4ECE_DA1C_E2A9;

/// Training phase of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentPhase {
    /// Constructed, or between `learn` calls after a recoverable error
    Idle,
    /// Filling the rollout buffer
    Collecting,
    /// Computing advantages
    Estimating,
    /// Running gradient updates
    Optimizing,
    /// The last `learn` call exhausted its budget or was stopped
    Done,
    /// Stopped by a numerical instability; only `restore` leaves this state
    Halted,
}

/// Limits for one `learn_with_budget` call; at least one must be set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingBudget {
    /// Additional environment steps to train on
    pub timesteps: Option<usize>,
    /// Additional iterations to run
    pub iterations: Option<usize>,
}

impl TrainingBudget {
    /// Budget in environment steps
    #[must_use]
    pub fn timesteps(timesteps: usize) -> Self {
        Self {
            timesteps: Some(timesteps),
            iterations: None,
        }
    }

    /// Budget in iterations
    #[must_use]
    pub fn iterations(iterations: usize) -> Self {
        Self {
            timesteps: None,
            iterations: Some(iterations),
        }
    }
}

/// Cloneable flag asking a running `learn` call to stop at the next iteration boundary
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Request a stop
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop is pending
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Why a `learn` call returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The timestep budget was reached
    TimestepBudget,
    /// The iteration budget was reached
    IterationBudget,
    /// A [`StopHandle`] requested a stop
    StopRequested,
}

/// Statistics of one collect/estimate/optimize cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    /// Iteration number over the agent's lifetime, starting at 1
    pub iteration: usize,
    /// Environment steps trained on so far, including this iteration
    pub total_timesteps: usize,
    /// Transitions in this rollout
    pub rollout_steps: usize,
    /// Episodes that finished during this rollout
    pub episodes_finished: usize,
    /// Mean reward of those episodes
    pub mean_episode_reward: Option<f64>,
    /// Mean reward over the recent-episode window
    pub running_mean_reward: Option<f64>,
    /// Learning rate used for this update
    pub learning_rate: f64,
    /// Environment faults retried before the rollout succeeded
    pub environment_retries: usize,
    /// Optimizer diagnostics
    pub update: UpdateStats,
}

/// Outcome of a `learn` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// One entry per iteration run by this call
    pub iterations: Vec<IterationStats>,
    /// Lifetime environment steps after the call
    pub total_timesteps: usize,
    /// Lifetime finished episodes after the call
    pub total_episodes: usize,
    /// Why the call returned
    pub stop_reason: StopReason,
}

impl TrainingReport {
    /// Mean episode reward per iteration, skipping iterations without a finished episode
    #[must_use]
    pub fn mean_episode_rewards(&self) -> Vec<f64> {
        self.iterations
            .iter()
            .filter_map(|it| it.mean_episode_reward)
            .collect()
    }
}

/// PPO agent bound to one environment
pub struct PPOAgent<E: Environment> {
    config: PPOConfig,
    policy_architecture: String,
    value_architecture: String,
    actor_critic: ActorCritic<E::Action>,
    collector: RolloutCollector<E>,
    buffer: RolloutBuffer<E::Action>,
    estimator: GaeEstimator,
    policy_optimizer: PolicyOptimizer,
    optimizer: Box<dyn GradientOptimizer>,
    rng: StdRng,
    inference_rng: StdRng,
    phase: AgentPhase,
    stop: StopHandle,
    total_timesteps: usize,
    total_iterations: usize,
    total_episodes: usize,
    recent_episodes: VecDeque<Episode>,
    last_update: Option<UpdateStats>,
}

impl<E> PPOAgent<E>
where
    E: Environment,
    E::Action: DefaultArchitectures,
{
    /// Create an agent using the built-in architectures
    pub fn new(
        policy_architecture: &str,
        value_architecture: &str,
        env: E,
        config: PPOConfig,
    ) -> Result<Self> {
        Self::with_registry(
            &ArchitectureRegistry::default(),
            policy_architecture,
            value_architecture,
            env,
            config,
        )
    }
}

impl<E> PPOAgent<E>
where
    E: Environment,
    E::Action: 'static,
{
    /// Create an agent resolving architecture names in `registry`
    pub fn with_registry(
        registry: &ArchitectureRegistry<E::Action>,
        policy_architecture: &str,
        value_architecture: &str,
        env: E,
        config: PPOConfig,
    ) -> Result<Self> {
        config.validate()?;
        let seed = config.base.seed.unwrap_or_else(rand::random);

        let collector = RolloutCollector::new(
            env,
            CollectorConfig {
                gamma: config.base.gamma,
                bootstrap_truncated: config.bootstrap_truncated,
                stop_at_episode_end: config.stop_at_episode_end,
            },
        );
        let spec = ArchitectureSpec {
            observation_dim: collector.observation_dim(),
            action_dim: collector.action_dim(),
            seed,
        };
        if spec.observation_dim == 0 || spec.action_dim == 0 {
            return Err(RLError::Configuration(format!(
                "environment declares empty spaces: {} observation features, {} action outputs",
                spec.observation_dim, spec.action_dim
            )));
        }
        let actor_critic = registry.build(policy_architecture, value_architecture, &spec)?;

        info!(
            policy = policy_architecture,
            value = value_architecture,
            observation_dim = spec.observation_dim,
            action_dim = spec.action_dim,
            parameters = actor_critic.num_parameters(),
            seed,
            "created PPO agent"
        );

        Ok(Self {
            estimator: GaeEstimator::new(
                config.base.gamma,
                config.gae_lambda,
                config.normalize_advantages,
            ),
            policy_optimizer: PolicyOptimizer::new(OptimizerSettings::from(&config)),
            optimizer: Box::new(Adam::new(config.base.learning_rate)),
            buffer: RolloutBuffer::new(config.rollout_length),
            rng: StdRng::seed_from_u64(seed.wrapping_add(SAMPLING_SEED_OFFSET)),
            inference_rng: StdRng::seed_from_u64(seed ^ INFERENCE_SEED_OFFSET),
            policy_architecture: policy_architecture.to_string(),
            value_architecture: value_architecture.to_string(),
            recent_episodes: VecDeque::with_capacity(config.stats_window),
            config,
            actor_critic,
            collector,
            phase: AgentPhase::Idle,
            stop: StopHandle::default(),
            total_timesteps: 0,
            total_iterations: 0,
            total_episodes: 0,
            last_update: None,
        })
    }

    /// Replace the default Adam optimizer
    #[must_use]
    pub fn with_optimizer(mut self, mut optimizer: Box<dyn GradientOptimizer>) -> Self {
        optimizer.set_learning_rate(self.config.base.learning_rate);
        self.optimizer = optimizer;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &PPOConfig {
        &self.config
    }

    /// Current phase
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// The trained actor-critic
    pub fn actor_critic(&self) -> &ActorCritic<E::Action> {
        &self.actor_critic
    }

    /// Borrow the training environment
    pub fn environment(&self) -> &E {
        self.collector.environment()
    }

    /// Handle that stops training at the next iteration boundary
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Environment steps trained on
    pub fn total_timesteps(&self) -> usize {
        self.total_timesteps
    }

    /// Completed iterations
    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }

    /// Most recent finished episodes, oldest first
    pub fn recent_episodes(&self) -> impl Iterator<Item = &Episode> {
        self.recent_episodes.iter()
    }

    /// Mean reward over the recent-episode window
    pub fn running_mean_reward(&self) -> Option<f64> {
        if self.recent_episodes.is_empty() {
            return None;
        }
        let sum: f64 = self.recent_episodes.iter().map(|e| e.total_reward).sum();
        Some(sum / self.recent_episodes.len() as f64)
    }

    /// Train until `budget` is exhausted or a stop is requested
    pub fn learn_with_budget(&mut self, budget: TrainingBudget) -> Result<TrainingReport> {
        if self.phase == AgentPhase::Halted {
            return Err(RLError::InvalidPhase(
                "agent halted after a numerical instability; restore a checkpoint first".into(),
            ));
        }
        if budget.timesteps.is_none() && budget.iterations.is_none() {
            return Err(RLError::Configuration(
                "training budget must limit timesteps or iterations".into(),
            ));
        }

        let start_timesteps = self.total_timesteps;
        let target_timesteps = budget
            .timesteps
            .map(|t| start_timesteps.saturating_add(t));
        let schedule_steps = budget
            .timesteps
            .or_else(|| budget.iterations.map(|i| i.saturating_mul(self.config.rollout_length)))
            .unwrap_or(0);
        let schedule: Box<dyn Schedule> = if self.config.anneal_learning_rate {
            Box::new(LinearSchedule::new(
                self.config.base.learning_rate,
                0.0,
                schedule_steps,
            ))
        } else {
            Box::new(crate::utils::ConstantSchedule {
                value: self.config.base.learning_rate,
            })
        };

        let mut iterations = Vec::new();
        let stop_reason = loop {
            if self.stop.take() {
                info!(iterations = iterations.len(), "stop requested");
                break StopReason::StopRequested;
            }
            if target_timesteps.is_some_and(|target| self.total_timesteps >= target) {
                break StopReason::TimestepBudget;
            }
            if budget.iterations.is_some_and(|limit| iterations.len() >= limit) {
                break StopReason::IterationBudget;
            }

            let learning_rate = schedule.value(self.total_timesteps - start_timesteps);
            match self.run_iteration(learning_rate) {
                Ok(stats) => iterations.push(stats),
                Err(err) => {
                    self.buffer.clear();
                    if matches!(err, RLError::NumericalInstability { .. }) {
                        error!(iteration = self.total_iterations + 1, %err, "halting training");
                        self.phase = AgentPhase::Halted;
                    } else {
                        self.phase = AgentPhase::Idle;
                    }
                    return Err(err);
                }
            }
        };

        self.phase = AgentPhase::Done;
        Ok(TrainingReport {
            iterations,
            total_timesteps: self.total_timesteps,
            total_episodes: self.total_episodes,
            stop_reason,
        })
    }

    fn collect_with_retries(&mut self) -> Result<(RolloutSummary, usize)> {
        let mut retries = 0;
        loop {
            self.phase = AgentPhase::Collecting;
            self.buffer.clear();
            match self
                .collector
                .collect(&self.actor_critic, &mut self.buffer, &mut self.rng)
            {
                Ok(summary) => return Ok((summary, retries)),
                Err(err) if err.is_environment_fault() && retries < self.config.max_environment_retries => {
                    retries += 1;
                    warn!(
                        %err,
                        retry = retries,
                        max_retries = self.config.max_environment_retries,
                        discarded = self.buffer.len(),
                        "environment fault; discarding partial rollout"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn run_iteration(&mut self, learning_rate: f64) -> Result<IterationStats> {
        self.optimizer.set_learning_rate(learning_rate);
        let (summary, environment_retries) = self.collect_with_retries()?;

        self.phase = AgentPhase::Estimating;
        self.estimator
            .estimate(&mut self.buffer, summary.bootstrap_value)?;

        self.phase = AgentPhase::Optimizing;
        let update = self.policy_optimizer.optimize(
            &mut self.actor_critic,
            self.optimizer.as_mut(),
            &self.buffer,
            &mut self.rng,
        )?;
        self.buffer.clear();

        self.total_iterations += 1;
        self.total_timesteps += summary.steps;
        self.total_episodes += summary.episodes.len();
        let episodes_finished = summary.episodes.len();
        let mean_episode_reward = if summary.episodes.is_empty() {
            None
        } else {
            let sum: f64 = summary.episodes.iter().map(|e| e.total_reward).sum();
            Some(sum / summary.episodes.len() as f64)
        };
        for episode in summary.episodes {
            if self.recent_episodes.len() == self.config.stats_window {
                self.recent_episodes.pop_front();
            }
            self.recent_episodes.push_back(episode);
        }

        let stats = IterationStats {
            iteration: self.total_iterations,
            total_timesteps: self.total_timesteps,
            rollout_steps: summary.steps,
            episodes_finished,
            mean_episode_reward,
            running_mean_reward: self.running_mean_reward(),
            learning_rate,
            environment_retries,
            update: update.clone(),
        };
        self.last_update = Some(update);

        let log_interval = self.config.base.log_interval.max(1);
        if self.total_iterations % log_interval == 0 {
            info!(
                iteration = stats.iteration,
                timesteps = stats.total_timesteps,
                mean_reward = stats.running_mean_reward,
                loss = stats.update.total_loss,
                approx_kl = stats.update.approx_kl,
                clip_fraction = stats.update.clip_fraction,
                explained_variance = stats.update.explained_variance,
                learning_rate,
                "iteration complete"
            );
        } else {
            debug!(iteration = stats.iteration, "iteration complete");
        }
        Ok(stats)
    }

    /// Run the current policy on a separate environment without learning
    ///
    /// Sampling draws from a stream of its own, so evaluating between `learn`
    /// calls leaves training reproducible.
    pub fn evaluate<Env>(
        &mut self,
        env: &mut Env,
        episodes: usize,
        deterministic: bool,
    ) -> Result<EvaluationReport>
    where
        Env: Environment<Action = E::Action>,
    {
        evaluate_policy(
            &self.actor_critic,
            env,
            episodes,
            deterministic,
            &mut self.inference_rng,
        )
    }

    /// Snapshot parameters, counters and configuration
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            policy_architecture: self.policy_architecture.clone(),
            value_architecture: self.value_architecture.clone(),
            config: self.config.clone(),
            policy_parameters: self.actor_critic.policy_parameters().clone(),
            value_parameters: self.actor_critic.value_parameters().clone(),
            total_timesteps: self.total_timesteps,
            total_iterations: self.total_iterations,
            total_episodes: self.total_episodes,
            recent_rewards: self.recent_episodes.iter().map(|e| e.total_reward).collect(),
            saved_at: chrono::Utc::now(),
        }
    }

    /// Load parameters and counters from a snapshot of a compatible agent
    ///
    /// Clears a halted state and restarts the optimizer's moments. The agent
    /// keeps its own configuration.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        if checkpoint.policy_architecture != self.policy_architecture
            || checkpoint.value_architecture != self.value_architecture
        {
            return Err(RLError::Configuration(format!(
                "checkpoint was taken with architectures ({}, {}), agent uses ({}, {})",
                checkpoint.policy_architecture,
                checkpoint.value_architecture,
                self.policy_architecture,
                self.value_architecture
            )));
        }
        let [policy, value] = self.actor_critic.parameters_mut();
        for (current, saved) in [
            (&*policy, &checkpoint.policy_parameters),
            (&*value, &checkpoint.value_parameters),
        ] {
            if current.len() != saved.len() {
                return Err(RLError::DimensionMismatch {
                    expected: current.len(),
                    actual: saved.len(),
                });
            }
        }
        if !checkpoint
            .policy_parameters
            .iter()
            .chain(checkpoint.value_parameters.iter())
            .all(|p| p.is_finite())
        {
            return Err(RLError::numerical("restore", "checkpoint holds non-finite parameters"));
        }
        policy.assign(&checkpoint.policy_parameters);
        value.assign(&checkpoint.value_parameters);
        if checkpoint.config != self.config {
            warn!("checkpoint configuration differs from the agent's; keeping the agent's");
        }

        self.total_timesteps = checkpoint.total_timesteps;
        self.total_iterations = checkpoint.total_iterations;
        self.total_episodes = checkpoint.total_episodes;
        self.recent_episodes.clear();
        self.buffer.clear();
        self.collector.invalidate();
        self.optimizer.reset();
        self.phase = AgentPhase::Idle;
        Ok(())
    }
}

impl<E> Agent for PPOAgent<E>
where
    E: Environment,
    E::Action: 'static,
{
    type Observation = E::Observation;
    type Action = E::Action;
    type Report = TrainingReport;

    fn act(&mut self, observation: &E::Observation, deterministic: bool) -> Result<E::Action> {
        let features = observation.to_vec();
        let expected = self.collector.observation_dim();
        if features.len() != expected {
            return Err(RLError::DimensionMismatch {
                expected,
                actual: features.len(),
            });
        }
        if deterministic {
            self.actor_critic.mode(&features)
        } else {
            Ok(self.actor_critic.act(&features, &mut self.inference_rng)?.action)
        }
    }

    fn learn(&mut self, total_timesteps: usize) -> Result<TrainingReport> {
        self.learn_with_budget(TrainingBudget::timesteps(total_timesteps))
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.checkpoint().save(path)
    }

    fn load(&mut self, path: &Path) -> Result<()> {
        let checkpoint = Checkpoint::load(path)?;
        self.restore(&checkpoint)
    }

    fn metrics(&self) -> AgentMetrics {
        let mut custom = serde_json::Map::new();
        custom.insert("learning_rate".into(), json!(self.optimizer.learning_rate()));
        custom.insert("phase".into(), json!(self.phase));
        if let Some(update) = &self.last_update {
            custom.insert("policy_loss".into(), json!(update.policy_loss));
            custom.insert("value_loss".into(), json!(update.value_loss));
            custom.insert("entropy".into(), json!(update.entropy));
            custom.insert("approx_kl".into(), json!(update.approx_kl));
            custom.insert("clip_fraction".into(), json!(update.clip_fraction));
            custom.insert("explained_variance".into(), json!(update.explained_variance));
        }
        AgentMetrics {
            total_steps: self.total_timesteps,
            total_episodes: self.total_episodes,
            total_iterations: self.total_iterations,
            avg_episode_reward: self.running_mean_reward().unwrap_or(0.0),
            loss: self.last_update.as_ref().map(|u| u.total_loss),
            custom,
        }
    }
}

impl<E: Environment> std::fmt::Debug for PPOAgent<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PPOAgent")
            .field("policy_architecture", &self.policy_architecture)
            .field("value_architecture", &self.value_architecture)
            .field("phase", &self.phase)
            .field("total_timesteps", &self.total_timesteps)
            .field("total_iterations", &self.total_iterations)
            .finish_non_exhaustive()
    }
}
