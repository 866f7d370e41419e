//! Environment wrappers for common transformations

use rlkit_core::{ActionSpace, Environment, ObservationSpace, Result, Reward, Step, StepInfo};

/// Wrapper that modifies rewards
pub struct RewardWrapper<E, F> {
    /// Inner environment
    pub env: E,
    /// Reward transformation function
    pub reward_fn: F,
}

impl<E, F> RewardWrapper<E, F> {
    /// Wrap `env`, passing every reward through `reward_fn`
    pub fn new(env: E, reward_fn: F) -> Self {
        Self { env, reward_fn }
    }
}

impl<E, F> Environment for RewardWrapper<E, F>
where
    E: Environment,
    F: Fn(Reward, &Step<E::Observation>) -> Reward + Send,
{
    type Observation = E::Observation;
    type Action = E::Action;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        self.env.observation_space()
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.env.reset()
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let mut step = self.env.step(action)?;
        step.reward = (self.reward_fn)(step.reward, &step);
        Ok(step)
    }

    fn close(&mut self) -> Result<()> {
        self.env.close()
    }
}

/// Time limit wrapper
///
/// Ends an episode after `max_steps` steps, marking it as truncated unless
/// the inner environment finished it on that step itself.
#[derive(Debug, Clone)]
pub struct TimeLimit<E> {
    /// Inner environment
    pub env: E,
    /// Maximum steps
    pub max_steps: usize,
    /// Current step count
    pub steps: usize,
}

impl<E> TimeLimit<E> {
    /// Create a new time limit wrapper
    pub fn new(env: E, max_steps: usize) -> Self {
        Self {
            env,
            max_steps,
            steps: 0,
        }
    }
}

impl<E> Environment for TimeLimit<E>
where
    E: Environment,
{
    type Observation = E::Observation;
    type Action = E::Action;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        self.env.observation_space()
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.steps = 0;
        self.env.reset()
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        self.steps += 1;
        let mut step = self.env.step(action)?;

        if self.steps >= self.max_steps && !step.done {
            step.truncated = true;
            step.done = true;
        }

        Ok(step)
    }

    fn close(&mut self) -> Result<()> {
        self.env.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GoalEnv, ADVANCE, STAY};
    use rlkit_core::EnvironmentConfig;

    fn long_goal() -> GoalEnv {
        GoalEnv::new(&EnvironmentConfig {
            max_steps: Some(100),
            ..EnvironmentConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_time_limit_truncates() {
        let mut env = TimeLimit::new(long_goal(), 2);
        env.reset().unwrap();
        assert!(!env.step(STAY).unwrap().done);
        let step = env.step(STAY).unwrap();
        assert!(step.done && step.truncated);

        env.reset().unwrap();
        assert_eq!(env.steps, 0);
    }

    #[test]
    fn test_time_limit_keeps_terminal_steps() {
        let mut env = TimeLimit::new(long_goal(), 1);
        env.reset().unwrap();
        let step = env.step(ADVANCE).unwrap();
        assert!(step.done);
        assert!(!step.truncated);
    }

    #[test]
    fn test_reward_wrapper_scales() {
        let mut env = RewardWrapper::new(GoalEnv::default(), |r: Reward, _: &Step<_>| {
            Reward::new(r.value() * 10.0)
        });
        env.reset().unwrap();
        assert_eq!(env.step(ADVANCE).unwrap().reward.value(), 10.0);
    }
}
