//! Example: PPO on the two-state goal task

use rlkit_agent::prelude::*;
use rlkit_env::GoalEnv;
use tracing_subscriber::EnvFilter;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = PPOConfig {
        rollout_length: 64,
        minibatch_size: 16,
        epochs: 4,
        entropy_coef: 0.0,
        ..PPOConfig::default()
    };
    config.base.learning_rate = 0.01;
    config.base.seed = Some(7);

    let mut agent = PPOAgent::new("linear", "linear", GoalEnv::default(), config)?;
    let mut eval_env = GoalEnv::default();

    for iteration in 1..=10 {
        let report = agent.learn(64)?;
        let eval = agent.evaluate(&mut eval_env, 5, true)?;
        println!(
            "Iteration {iteration}: train reward = {:?}, greedy reward = {:.2}",
            report.mean_episode_rewards().first(),
            eval.mean_reward
        );
    }

    println!("\n{}", serde_json::to_string_pretty(&agent.metrics())?);
    Ok(())
}
