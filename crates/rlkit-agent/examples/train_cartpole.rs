//! Example: PPO on CartPole with a configurable budget
//!
//! Usage: `cargo run --example train_cartpole -- [timesteps] [config.json]`

use std::path::Path;

use rlkit_agent::prelude::*;
use rlkit_env::{CartPoleEnv, EnvironmentConfig, TimeLimit};
use tracing_subscriber::EnvFilter;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let timesteps: usize = args.next().map_or(Ok(50_000), |s| s.parse())?;
    let mut config = match args.next() {
        Some(path) => PPOConfig::from_json_file(Path::new(&path))?,
        None => PPOConfig::default(),
    };
    config.base.seed.get_or_insert(0);
    config.base.log_interval = 5;

    let env_config = EnvironmentConfig::seeded(1);
    let env = TimeLimit::new(CartPoleEnv::new(&env_config), 500);
    let mut agent = PPOAgent::new("mlp", "mlp", env, config)?;

    let report = agent.learn(timesteps)?;
    println!(
        "Trained {} iterations, {} timesteps, {} episodes ({:?})",
        report.iterations.len(),
        report.total_timesteps,
        report.total_episodes,
        report.stop_reason
    );

    let mut eval_env = TimeLimit::new(CartPoleEnv::new(&EnvironmentConfig::seeded(2)), 500);
    let eval = agent.evaluate(&mut eval_env, 10, true)?;
    println!(
        "Greedy evaluation: {:.1} ± {:.1} reward, {:.1} steps",
        eval.mean_reward, eval.std_reward, eval.mean_length
    );

    let path = std::env::temp_dir().join("rlkit-cartpole.json");
    agent.save(&path)?;
    println!("Saved checkpoint to {}", path.display());
    Ok(())
}
