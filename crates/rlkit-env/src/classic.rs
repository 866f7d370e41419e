//! Classic control environments

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use rlkit_core::{
    ActionSpace, BoxObservationSpace, ContinuousAction, ContinuousSpace, DiscreteAction,
    DiscreteSpace, Environment, EnvironmentConfig, ObservationSpace, RLError, Result, Reward, Step,
    StepInfo, VectorObservation,
};

fn seeded_rng(config: &EnvironmentConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn finished_episode() -> RLError {
    RLError::EnvironmentFault("step called on a finished episode; reset first".into())
}

/// CartPole environment
#[derive(Debug, Clone)]
pub struct CartPoleEnv {
    /// Current state
    state: CartPoleState,
    /// Configuration
    config: CartPoleConfig,
    /// Step count
    steps: usize,
    finished: bool,
    rng: StdRng,
}

#[derive(Debug, Clone)]
struct CartPoleState {
    x: f64,         // Cart position
    x_dot: f64,     // Cart velocity
    theta: f64,     // Pole angle
    theta_dot: f64, // Pole angular velocity
}

#[derive(Debug, Clone)]
struct CartPoleConfig {
    gravity: f64,
    mass_cart: f64,
    mass_pole: f64,
    length: f64,
    force_mag: f64,
    tau: f64,
    max_steps: usize,
    x_threshold: f64,
    theta_threshold: f64,
}

impl Default for CartPoleConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
            max_steps: 500,
            x_threshold: 2.4,
            theta_threshold: 0.209, // ~12 degrees
        }
    }
}

impl CartPoleEnv {
    /// Create a new CartPole environment
    ///
    /// `gravity`, `mass_cart`, `mass_pole`, `length` and `force_mag` may be
    /// overridden through numeric entries in `config.params`.
    #[must_use]
    pub fn new(config: &EnvironmentConfig) -> Self {
        let mut physics = CartPoleConfig::default();
        if let Some(max_steps) = config.max_steps {
            physics.max_steps = max_steps;
        }
        let param = |key: &str| config.params.get(key).and_then(serde_json::Value::as_f64);
        for (key, field) in [
            ("gravity", &mut physics.gravity),
            ("mass_cart", &mut physics.mass_cart),
            ("mass_pole", &mut physics.mass_pole),
            ("length", &mut physics.length),
            ("force_mag", &mut physics.force_mag),
        ] {
            if let Some(value) = param(key) {
                *field = value;
            }
        }
        debug!(?physics, seed = ?config.seed, "created CartPole");
        Self {
            state: CartPoleState {
                x: 0.0,
                x_dot: 0.0,
                theta: 0.0,
                theta_dot: 0.0,
            },
            config: physics,
            steps: 0,
            finished: true,
            rng: seeded_rng(config),
        }
    }

    fn get_observation(&self) -> VectorObservation {
        VectorObservation::new(vec![
            self.state.x,
            self.state.x_dot,
            self.state.theta,
            self.state.theta_dot,
        ])
    }

    fn is_failed(&self) -> bool {
        self.state.x.abs() > self.config.x_threshold
            || self.state.theta.abs() > self.config.theta_threshold
    }
}

impl Environment for CartPoleEnv {
    type Observation = VectorObservation;
    type Action = DiscreteAction;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        let high = vec![
            self.config.x_threshold * 2.0,
            f64::INFINITY,
            self.config.theta_threshold * 2.0,
            f64::INFINITY,
        ];
        let low = high.iter().map(|&x| -x).collect();
        Box::new(BoxObservationSpace {
            low,
            high,
            shape: vec![4],
        })
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(DiscreteSpace::new(2)) // 0: push left, 1: push right
    }

    fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.state = CartPoleState {
            x: self.rng.gen_range(-0.05..0.05),
            x_dot: self.rng.gen_range(-0.05..0.05),
            theta: self.rng.gen_range(-0.05..0.05),
            theta_dot: self.rng.gen_range(-0.05..0.05),
        };
        self.steps = 0;
        self.finished = false;

        Ok((self.get_observation(), StepInfo::default()))
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        if self.finished {
            return Err(finished_episode());
        }
        let force = match action.0 {
            0 => -self.config.force_mag,
            1 => self.config.force_mag,
            other => return Err(RLError::InvalidAction(format!("CartPole has no action {other}"))),
        };

        let cos_theta = self.state.theta.cos();
        let sin_theta = self.state.theta.sin();

        let total_mass = self.config.mass_cart + self.config.mass_pole;
        let pole_mass_length = self.config.mass_pole * self.config.length;

        let temp =
            (force + pole_mass_length * self.state.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (self.config.gravity * sin_theta - cos_theta * temp)
            / (self.config.length
                * (4.0 / 3.0 - self.config.mass_pole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        // Euler integration
        let dt = self.config.tau;
        self.state.x += dt * self.state.x_dot;
        self.state.x_dot += dt * x_acc;
        self.state.theta += dt * self.state.theta_dot;
        self.state.theta_dot += dt * theta_acc;

        self.steps += 1;

        let failed = self.is_failed();
        let truncated = !failed && self.steps >= self.config.max_steps;
        self.finished = failed || truncated;

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward::new(1.0), // Reward of 1 for each step survived
            done: self.finished,
            truncated,
            info: StepInfo::default(),
        })
    }
}

#[derive(Debug, Clone)]
struct MountainCarConfig {
    min_position: f64,
    max_position: f64,
    max_speed: f64,
    goal_position: f64,
    goal_velocity: f64,
    force: f64,
    gravity: f64,
    max_steps: usize,
}

impl Default for MountainCarConfig {
    fn default() -> Self {
        Self {
            min_position: -1.2,
            max_position: 0.6,
            max_speed: 0.07,
            goal_position: 0.5,
            goal_velocity: 0.0,
            force: 0.001,
            gravity: 0.0025,
            max_steps: 200,
        }
    }
}

#[derive(Debug, Clone)]
struct MountainCarState {
    position: f64,
    velocity: f64,
}

/// Car physics shared by the discrete and continuous variants
#[derive(Debug, Clone)]
struct MountainCar {
    state: MountainCarState,
    config: MountainCarConfig,
    steps: usize,
    finished: bool,
    rng: StdRng,
}

impl MountainCar {
    fn new(env_config: &EnvironmentConfig, mut config: MountainCarConfig) -> Self {
        if let Some(max_steps) = env_config.max_steps {
            config.max_steps = max_steps;
        }
        Self {
            state: MountainCarState {
                position: -0.5,
                velocity: 0.0,
            },
            config,
            steps: 0,
            finished: true,
            rng: seeded_rng(env_config),
        }
    }

    fn observation(&self) -> VectorObservation {
        VectorObservation::new(vec![self.state.position, self.state.velocity])
    }

    fn observation_space(&self) -> BoxObservationSpace {
        BoxObservationSpace {
            low: vec![self.config.min_position, -self.config.max_speed],
            high: vec![self.config.max_position, self.config.max_speed],
            shape: vec![2],
        }
    }

    fn reset(&mut self) -> VectorObservation {
        self.state = MountainCarState {
            position: self.rng.gen_range(-0.6..-0.4),
            velocity: 0.0,
        };
        self.steps = 0;
        self.finished = false;
        self.observation()
    }

    /// Apply a force in [-1, 1]; returns (reached goal, truncated)
    fn advance(&mut self, force: f64) -> Result<(bool, bool)> {
        if self.finished {
            return Err(finished_episode());
        }
        self.state.velocity +=
            force * self.config.force + self.state.position.cos() * (-self.config.gravity);
        self.state.velocity = self
            .state
            .velocity
            .clamp(-self.config.max_speed, self.config.max_speed);

        self.state.position += self.state.velocity;
        self.state.position = self
            .state
            .position
            .clamp(self.config.min_position, self.config.max_position);

        // Stop at boundaries
        if self.state.position <= self.config.min_position {
            self.state.velocity = 0.0;
        }

        self.steps += 1;

        let reached = self.state.position >= self.config.goal_position
            && self.state.velocity >= self.config.goal_velocity;
        let truncated = !reached && self.steps >= self.config.max_steps;
        self.finished = reached || truncated;
        Ok((reached, truncated))
    }
}

/// Mountain Car with three discrete pushes
#[derive(Debug, Clone)]
pub struct MountainCarEnv {
    car: MountainCar,
}

impl MountainCarEnv {
    /// Create a new Mountain Car environment
    #[must_use]
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            car: MountainCar::new(config, MountainCarConfig::default()),
        }
    }
}

impl Environment for MountainCarEnv {
    type Observation = VectorObservation;
    type Action = DiscreteAction;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        Box::new(self.car.observation_space())
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(DiscreteSpace::new(3)) // 0: push left, 1: no push, 2: push right
    }

    fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        Ok((self.car.reset(), StepInfo::default()))
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let force = match action.0 {
            0 => -1.0,
            1 => 0.0,
            2 => 1.0,
            other => return Err(RLError::InvalidAction(format!("MountainCar has no action {other}"))),
        };
        let (reached, truncated) = self.car.advance(force)?;

        Ok(Step {
            observation: self.car.observation(),
            reward: Reward::new(if reached { 0.0 } else { -1.0 }),
            done: reached || truncated,
            truncated,
            info: StepInfo::default(),
        })
    }
}

/// Mountain Car with a continuous force in [-1, 1]
///
/// Reward is +100 on reaching the goal minus `0.1 * force²` per step.
#[derive(Debug, Clone)]
pub struct ContinuousMountainCarEnv {
    car: MountainCar,
    actions: ContinuousSpace,
}

impl ContinuousMountainCarEnv {
    /// Create a new continuous Mountain Car environment
    #[must_use]
    pub fn new(config: &EnvironmentConfig) -> Self {
        let physics = MountainCarConfig {
            goal_position: 0.45,
            force: 0.0015,
            max_steps: 999,
            ..MountainCarConfig::default()
        };
        Self {
            car: MountainCar::new(config, physics),
            actions: ContinuousSpace {
                low: vec![-1.0],
                high: vec![1.0],
            },
        }
    }
}

impl Environment for ContinuousMountainCarEnv {
    type Observation = VectorObservation;
    type Action = ContinuousAction;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        Box::new(self.car.observation_space())
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(self.actions.clone())
    }

    fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        Ok((self.car.reset(), StepInfo::default()))
    }

    fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        if action.0.len() != 1 {
            return Err(RLError::DimensionMismatch {
                expected: 1,
                actual: action.0.len(),
            });
        }
        let force = self.actions.clip(&action).0[0];
        let (reached, truncated) = self.car.advance(force)?;
        let goal_bonus = if reached { 100.0 } else { 0.0 };
        let reward = goal_bonus - 0.1 * force * force;

        Ok(Step {
            observation: self.car.observation(),
            reward: Reward::new(reward),
            done: reached || truncated,
            truncated,
            info: StepInfo::default(),
        })
    }
}
