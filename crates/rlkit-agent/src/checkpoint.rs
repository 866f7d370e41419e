//! Serializable snapshots of a PPO agent

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use rlkit_core::{RLError, Result};

use crate::config::PPOConfig;

/// Current checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Parameters, counters and configuration of an agent
///
/// Optimizer moment estimates are not part of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format version
    pub version: u32,
    /// Policy architecture name
    pub policy_architecture: String,
    /// Value architecture name
    pub value_architecture: String,
    /// Configuration the agent was trained with
    pub config: PPOConfig,
    /// Flat policy parameters
    pub policy_parameters: Array1<f64>,
    /// Flat value parameters
    pub value_parameters: Array1<f64>,
    /// Environment steps trained on
    pub total_timesteps: usize,
    /// Completed iterations
    pub total_iterations: usize,
    /// Finished episodes
    pub total_episodes: usize,
    /// Rewards of the most recent episodes, oldest first
    pub recent_rewards: Vec<f64>,
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create checkpoint {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Read a JSON checkpoint
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open checkpoint {}", path.display()))?;
        let checkpoint: Self = serde_json::from_reader(BufReader::new(file))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(RLError::Configuration(format!(
                "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                checkpoint.version
            )));
        }
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn sample() -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            policy_architecture: "mlp".into(),
            value_architecture: "linear".into(),
            config: PPOConfig::default(),
            policy_parameters: arr1(&[0.5, -1.25]),
            value_parameters: arr1(&[2.0]),
            total_timesteps: 128,
            total_iterations: 2,
            total_episodes: 9,
            recent_rewards: vec![1.0, 0.0],
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("rlkit-checkpoint-{}.json", uuid::Uuid::new_v4()));
        let checkpoint = sample();
        checkpoint.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let path = std::env::temp_dir().join(format!("rlkit-checkpoint-{}.json", uuid::Uuid::new_v4()));
        let mut checkpoint = sample();
        checkpoint.version = 99;
        checkpoint.save(&path).unwrap();
        let err = Checkpoint::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, RLError::Configuration(_)));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = Checkpoint::load(Path::new("/nonexistent/agent.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/agent.json"));
    }
}
