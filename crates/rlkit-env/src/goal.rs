//! Two-state goal task
//!
//! The agent starts in state 0 and may either stay or advance. Advancing
//! reaches the goal (state 1), pays +1 and ends the episode. Staying pays
//! nothing; after `max_steps` steps without reaching the goal the episode is
//! truncated.

use rlkit_core::{
    ActionSpace, BoxObservationSpace, DiscreteAction, DiscreteSpace, Environment,
    EnvironmentConfig, ObservationSpace, RLError, Result, Reward, Step, StepInfo,
    VectorObservation,
};

/// Default episode length limit
pub const GOAL_MAX_STEPS: usize = 5;

/// Action that keeps the agent in place
pub const STAY: DiscreteAction = DiscreteAction(0);
/// Action that moves the agent to the goal
pub const ADVANCE: DiscreteAction = DiscreteAction(1);

/// Deterministic two-state environment with a single rewarding action
#[derive(Debug, Clone)]
pub struct GoalEnv {
    state: usize,
    steps: usize,
    max_steps: usize,
    finished: bool,
}

impl GoalEnv {
    /// Create the task; `config.max_steps` overrides the 5-step limit
    pub fn new(config: &EnvironmentConfig) -> Result<Self> {
        let max_steps = config.max_steps.unwrap_or(GOAL_MAX_STEPS);
        if max_steps == 0 {
            return Err(RLError::Configuration("GoalEnv needs max_steps >= 1".into()));
        }
        Ok(Self {
            state: 0,
            steps: 0,
            max_steps,
            finished: true,
        })
    }

    fn observation(&self) -> VectorObservation {
        let mut data = vec![0.0; 2];
        data[self.state] = 1.0;
        VectorObservation::new(data)
    }
}

impl Default for GoalEnv {
    fn default() -> Self {
        Self {
            state: 0,
            steps: 0,
            max_steps: GOAL_MAX_STEPS,
            finished: true,
        }
    }
}

impl Environment for GoalEnv {
    type Observation = VectorObservation;
    type Action = DiscreteAction;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        Box::new(BoxObservationSpace {
            low: vec![0.0; 2],
            high: vec![1.0; 2],
            shape: vec![2],
        })
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(DiscreteSpace::new(2))
    }

    fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.state = 0;
        self.steps = 0;
        self.finished = false;
        Ok((self.observation(), StepInfo::default()))
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        if self.finished {
            return Err(RLError::EnvironmentFault(
                "step called on a finished episode; reset first".into(),
            ));
        }
        let reward = match action {
            STAY => 0.0,
            ADVANCE => {
                self.state = 1;
                1.0
            }
            DiscreteAction(other) => {
                return Err(RLError::InvalidAction(format!("GoalEnv has no action {other}")))
            }
        };
        self.steps += 1;

        let reached = self.state == 1;
        let truncated = !reached && self.steps >= self.max_steps;
        self.finished = reached || truncated;
        Ok(Step {
            observation: self.observation(),
            reward: Reward::new(reward),
            done: self.finished,
            truncated,
            info: StepInfo::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_reaches_goal() {
        let mut env = GoalEnv::default();
        let (obs, _) = env.reset().unwrap();
        assert_eq!(obs.data, vec![1.0, 0.0]);

        let step = env.step(ADVANCE).unwrap();
        assert_eq!(step.reward.value(), 1.0);
        assert!(step.done);
        assert!(!step.truncated);
        assert_eq!(step.observation.data, vec![0.0, 1.0]);
    }

    #[test]
    fn test_staying_truncates_after_limit() {
        let mut env = GoalEnv::default();
        env.reset().unwrap();
        for _ in 0..4 {
            let step = env.step(STAY).unwrap();
            assert!(!step.done);
            assert_eq!(step.reward.value(), 0.0);
        }
        let step = env.step(STAY).unwrap();
        assert!(step.done && step.truncated);
        assert!(env.step(STAY).unwrap_err().is_environment_fault());
    }

    #[test]
    fn test_custom_limit_and_invalid_action() {
        let config = EnvironmentConfig {
            max_steps: Some(1),
            ..EnvironmentConfig::default()
        };
        let mut env = GoalEnv::new(&config).unwrap();
        env.reset().unwrap();
        assert!(matches!(env.step(DiscreteAction(5)), Err(RLError::InvalidAction(_))));
        assert!(env.step(STAY).unwrap().truncated);
    }
}
