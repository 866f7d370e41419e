//! End-to-end training behaviour of `PPOAgent`

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;

use rlkit_agent::prelude::*;
use rlkit_agent::{Adam, AgentPhase, ArchitectureSpec, MLPConfig, MlpValue, StopReason};
use rlkit_core::{
    DiscreteAction, EnvironmentConfig, GradientOptimizer, StepInfo, ValueFunction,
    VectorObservation,
};
use rlkit_env::{ContinuousMountainCarEnv, GoalEnv, TimeLimit};

fn goal_config(seed: u64) -> PPOConfig {
    let mut config = PPOConfig {
        rollout_length: 64,
        minibatch_size: 16,
        epochs: 4,
        clip_ratio: 0.2,
        entropy_coef: 0.0,
        value_coef: 0.5,
        gae_lambda: 0.95,
        normalize_advantages: true,
        ..PPOConfig::default()
    };
    config.base.learning_rate = 0.01;
    config.base.gamma = 0.99;
    config.base.seed = Some(seed);
    config
}

fn goal_agent(seed: u64) -> PPOAgent<GoalEnv> {
    PPOAgent::new("linear", "linear", GoalEnv::default(), goal_config(seed)).unwrap()
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("rlkit-{name}-{}.json", uuid::Uuid::new_v4()))
}

/// Goal task whose `step` fails on selected calls
struct FaultyEnv {
    inner: GoalEnv,
    calls: usize,
    fail_on: Vec<usize>,
    fail_after: Option<usize>,
}

impl FaultyEnv {
    fn failing_on(calls: &[usize]) -> Self {
        Self {
            inner: GoalEnv::default(),
            calls: 0,
            fail_on: calls.to_vec(),
            fail_after: None,
        }
    }

    fn failing_after(call: usize) -> Self {
        Self {
            fail_after: Some(call),
            ..Self::failing_on(&[])
        }
    }
}

impl Environment for FaultyEnv {
    type Observation = VectorObservation;
    type Action = DiscreteAction;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        self.inner.observation_space()
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.inner.action_space()
    }

    fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.inner.reset()
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        self.calls += 1;
        let failing = self.fail_on.contains(&self.calls)
            || self.fail_after.is_some_and(|after| self.calls > after);
        if failing {
            return Err(RLError::EnvironmentFault(format!("simulated fault at call {}", self.calls)));
        }
        self.inner.step(action)
    }
}

/// Value head that reports NaN for every state
struct PoisonedValue(MlpValue);

impl ValueFunction for PoisonedValue {
    fn value(&self, _observation: &[f64]) -> Result<f64> {
        Ok(f64::NAN)
    }

    fn backward(&self, observation: &[f64], d_value: f64, grad: &mut Array1<f64>) -> Result<()> {
        self.0.backward(observation, d_value, grad)
    }

    fn parameters(&self) -> &Array1<f64> {
        self.0.parameters()
    }

    fn parameters_mut(&mut self) -> &mut Array1<f64> {
        self.0.parameters_mut()
    }
}

/// Adam that publishes its update count
struct CountingAdam {
    inner: Adam,
    steps: Arc<AtomicI32>,
}

impl GradientOptimizer for CountingAdam {
    fn apply_gradients(
        &mut self,
        params: &mut [&mut Array1<f64>],
        grads: &[&Array1<f64>],
    ) -> Result<()> {
        self.inner.apply_gradients(params, grads)?;
        self.steps.store(self.inner.steps(), Ordering::SeqCst);
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.steps.store(0, Ordering::SeqCst);
    }
}

#[test]
fn goal_task_improves_monotonically() {
    let mut agent = goal_agent(7);
    let report = agent
        .learn_with_budget(TrainingBudget::iterations(10))
        .unwrap();
    assert_eq!(report.stop_reason, StopReason::IterationBudget);
    assert_eq!(agent.total_iterations(), 10);
    assert_eq!(agent.total_timesteps(), 640);

    let rewards = report.mean_episode_rewards();
    assert_eq!(rewards.len(), 10);
    assert!(
        rewards.windows(2).all(|w| w[1] >= w[0]),
        "mean episode reward regressed: {rewards:?}"
    );

    let eval = agent.evaluate(&mut GoalEnv::default(), 3, true).unwrap();
    assert_eq!(eval.mean_reward, 1.0);
}

#[test]
fn environment_fault_discards_partial_rollout_and_retries() {
    let mut config = goal_config(3);
    config.max_environment_retries = 2;
    let env = FaultyEnv::failing_on(&[10, 30]);
    let mut agent = PPOAgent::new("linear", "linear", env, config).unwrap();

    let report = agent.learn(64).unwrap();
    let stats = &report.iterations[0];
    assert_eq!(stats.environment_retries, 2);
    assert_eq!(stats.rollout_steps, 64);
    assert_eq!(agent.total_timesteps(), 64);
    assert_eq!(agent.phase(), AgentPhase::Done);
}

#[test]
fn persistent_environment_fault_is_surfaced() {
    let mut config = goal_config(3);
    config.max_environment_retries = 1;
    let mut agent =
        PPOAgent::new("linear", "linear", FaultyEnv::failing_after(20), config).unwrap();

    let err = agent.learn(64).unwrap_err();
    assert!(err.is_environment_fault());
    assert_eq!(agent.total_timesteps(), 0);
    assert_eq!(agent.total_iterations(), 0);
    assert_eq!(agent.phase(), AgentPhase::Idle);
}

#[test]
fn numerical_instability_halts_until_restore() {
    let mut registry = ArchitectureRegistry::<DiscreteAction>::default();
    registry.register_value("poisoned", |spec: &ArchitectureSpec| {
        let config = MLPConfig {
            input_dim: spec.observation_dim,
            hidden_dims: vec![],
            output_dim: 1,
            ..MLPConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let value = MlpValue::new(config, &mut rng);
        Ok(Box::new(PoisonedValue(value)) as Box<dyn ValueFunction>)
    });

    let healthy = goal_agent(5).checkpoint();
    let mut agent = PPOAgent::with_registry(
        &registry,
        "linear",
        "poisoned",
        GoalEnv::default(),
        goal_config(5),
    )
    .unwrap();

    let err = agent.learn(64).unwrap_err();
    assert!(matches!(err, RLError::NumericalInstability { .. }));
    assert_eq!(agent.phase(), AgentPhase::Halted);
    assert_eq!(agent.total_timesteps(), 0);

    let err = agent.learn(64).unwrap_err();
    assert!(matches!(err, RLError::InvalidPhase(_)));

    // Different value architecture name: restore refuses the snapshot
    assert!(agent.restore(&healthy).is_err());
    assert_eq!(agent.phase(), AgentPhase::Halted);

    let own = agent.checkpoint();
    agent.restore(&own).unwrap();
    assert_eq!(agent.phase(), AgentPhase::Idle);
}

#[test]
fn restore_restarts_optimizer_moments() {
    let steps = Arc::new(AtomicI32::new(0));
    let mut agent = goal_agent(6).with_optimizer(Box::new(CountingAdam {
        inner: Adam::new(0.01),
        steps: Arc::clone(&steps),
    }));

    agent.learn(64).unwrap();
    // 4 epochs of 4 minibatches
    assert_eq!(steps.load(Ordering::SeqCst), 16);
    let snapshot = agent.checkpoint();
    agent.learn(64).unwrap();
    assert_eq!(steps.load(Ordering::SeqCst), 32);

    agent.restore(&snapshot).unwrap();
    assert_eq!(steps.load(Ordering::SeqCst), 0);
    agent.learn(64).unwrap();
    assert_eq!(steps.load(Ordering::SeqCst), 16);
}

#[test]
fn sampled_evaluation_leaves_training_reproducible() {
    let mut plain = goal_agent(13);
    let mut evaluated = goal_agent(13);
    plain.learn(64).unwrap();
    evaluated.learn(64).unwrap();

    evaluated.evaluate(&mut GoalEnv::default(), 5, false).unwrap();
    evaluated
        .act(&VectorObservation::new(vec![1.0, 0.0]), false)
        .unwrap();

    assert_eq!(plain.learn(128).unwrap(), evaluated.learn(128).unwrap());
    assert_eq!(
        plain.actor_critic().policy_parameters(),
        evaluated.actor_critic().policy_parameters()
    );
}

#[test]
fn agents_train_independently_on_threads() {
    let run = |seed: u64| {
        std::thread::spawn(move || {
            let mut agent = goal_agent(seed);
            let report = agent.learn(192).unwrap();
            (report, agent.actor_critic().policy_parameters().clone())
        })
    };

    let handles = [run(11), run(11), run(12)];
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results[0].0, results[1].0);
    assert_eq!(results[0].1, results[1].1);
    assert_ne!(results[0].1, results[2].1);
    assert_eq!(results[2].0.iterations.len(), 3);
}

#[test]
fn invalid_configuration_is_rejected_at_construction() {
    let mut config = goal_config(1);
    config.minibatch_size = 10;
    let err = PPOAgent::new("linear", "linear", GoalEnv::default(), config).unwrap_err();
    assert!(matches!(err, RLError::Configuration(_)));

    let mut config = goal_config(1);
    config.clip_ratio = 0.0;
    assert!(PPOAgent::new("linear", "linear", GoalEnv::default(), config).is_err());

    let err = PPOAgent::new("lstm", "linear", GoalEnv::default(), goal_config(1)).unwrap_err();
    assert!(matches!(err, RLError::UnknownArchitecture(_)));
}

#[test]
fn stop_request_is_honoured_at_iteration_boundary() {
    let mut agent = goal_agent(2);
    let stop = agent.stop_handle();
    stop.request_stop();

    let report = agent.learn(640).unwrap();
    assert!(report.iterations.is_empty());
    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert!(!stop.is_stop_requested());

    let report = agent.learn_with_budget(TrainingBudget::iterations(2)).unwrap();
    assert_eq!(report.iterations.len(), 2);
    assert_eq!(report.stop_reason, StopReason::IterationBudget);
    assert_eq!(agent.total_timesteps(), 128);
}

#[test]
fn saved_agent_restores_parameters_and_counters() {
    let mut trained = goal_agent(4);
    trained.learn(128).unwrap();
    let path = temp_path("agent");
    trained.save(&path).unwrap();

    let mut fresh = goal_agent(99);
    assert_ne!(
        fresh.actor_critic().policy_parameters(),
        trained.actor_critic().policy_parameters()
    );
    fresh.load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(
        fresh.actor_critic().policy_parameters(),
        trained.actor_critic().policy_parameters()
    );
    assert_eq!(
        fresh.actor_critic().value_parameters(),
        trained.actor_critic().value_parameters()
    );
    assert_eq!(fresh.total_timesteps(), 128);
    assert_eq!(fresh.total_iterations(), 2);

    let observation = VectorObservation::new(vec![1.0, 0.0]);
    assert_eq!(
        fresh.act(&observation, true).unwrap(),
        trained.act(&observation, true).unwrap()
    );
    assert_eq!(fresh.metrics().total_steps, 128);
}

#[test]
fn act_rejects_wrong_observation_size() {
    let mut agent = goal_agent(8);
    let err = agent
        .act(&VectorObservation::new(vec![1.0, 0.0, 0.0]), false)
        .unwrap_err();
    assert!(matches!(err, RLError::DimensionMismatch { expected: 2, actual: 3 }));
}

#[test]
fn continuous_control_runs_with_time_limit() {
    let env = TimeLimit::new(ContinuousMountainCarEnv::new(&EnvironmentConfig::seeded(1)), 50);
    let config = PPOConfig {
        rollout_length: 128,
        minibatch_size: 32,
        epochs: 2,
        bootstrap_truncated: true,
        anneal_learning_rate: true,
        ..goal_config(21)
    };
    let mut agent = PPOAgent::new("mlp", "mlp", env, config).unwrap();

    let report = agent.learn(256).unwrap();
    assert_eq!(report.iterations.len(), 2);
    assert!(report.total_episodes >= 4);
    assert!(report.iterations[1].learning_rate < report.iterations[0].learning_rate);
    for stats in &report.iterations {
        assert!(stats.update.total_loss.is_finite());
        assert!(stats.update.approx_kl >= 0.0);
    }
    assert!(agent.actor_critic().parameters_finite());
}
