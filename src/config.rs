use std::path::Path;

use tracing::warn;

use crate::ai::{DdpgConfig, DqnConfig};
use crate::channel::{ChannelConfig, SimulatorConfig};
use crate::checkpoint::CheckpointStoreConfig;
use crate::error::ConfigError;
use crate::training::TrainingConfig;

/// Top-level application configuration, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub checkpoint: CheckpointStoreConfig,
    pub channel: ChannelConfig,
    pub simulator: SimulatorConfig,
    pub training: TrainingConfig,
    pub dqn: DqnConfig,
    pub ddpg: DdpgConfig,
}

fn unit_interval(name: &str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Validation(format!("{name} must be in [0, 1]")));
    }
    Ok(())
}

fn positive(name: &str, value: f32) -> Result<(), ConfigError> {
    if value <= 0.0 {
        return Err(ConfigError::Validation(format!("{name} must be > 0")));
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate configuration values. External prerequisites are checked
    /// separately by [`SimulatorConfig::validate_environment`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.validate()?;
        self.simulator.validate()?;

        if self.checkpoint.checkpoint_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "checkpoint.checkpoint_dir must not be empty".into(),
            ));
        }

        let dqn = &self.dqn;
        positive("dqn.learning_rate", dqn.learning_rate)?;
        unit_interval("dqn.discount", dqn.discount)?;
        unit_interval("dqn.tau", dqn.tau)?;
        unit_interval("dqn.epsilon_start", dqn.epsilon_start)?;
        unit_interval("dqn.epsilon_min", dqn.epsilon_min)?;
        unit_interval("dqn.epsilon_decay", dqn.epsilon_decay)?;
        if dqn.epsilon_min > dqn.epsilon_start {
            return Err(ConfigError::Validation(
                "dqn.epsilon_min must be <= dqn.epsilon_start".into(),
            ));
        }
        if dqn.batch_size == 0 {
            return Err(ConfigError::Validation("dqn.batch_size must be > 0".into()));
        }
        if dqn.replay_capacity < dqn.batch_size {
            return Err(ConfigError::Validation(
                "dqn.replay_capacity must be >= dqn.batch_size".into(),
            ));
        }
        if dqn.history_segments == 0 {
            return Err(ConfigError::Validation(
                "dqn.history_segments must be >= 1".into(),
            ));
        }

        let ddpg = &self.ddpg;
        positive("ddpg.actor_learning_rate", ddpg.actor_learning_rate)?;
        positive("ddpg.critic_learning_rate", ddpg.critic_learning_rate)?;
        unit_interval("ddpg.discount", ddpg.discount)?;
        unit_interval("ddpg.tau", ddpg.tau)?;
        unit_interval("ddpg.noise_decay", ddpg.noise_decay)?;
        if ddpg.noise_min < 0.0 || ddpg.noise_min > ddpg.noise_start {
            return Err(ConfigError::Validation(
                "ddpg.noise_min must be in [0, ddpg.noise_start]".into(),
            ));
        }
        if ddpg.min_action >= ddpg.max_action {
            return Err(ConfigError::Validation(
                "ddpg.min_action must be < ddpg.max_action".into(),
            ));
        }
        if ddpg.batch_size == 0 {
            return Err(ConfigError::Validation("ddpg.batch_size must be > 0".into()));
        }
        if ddpg.replay_capacity < ddpg.batch_size {
            return Err(ConfigError::Validation(
                "ddpg.replay_capacity must be >= ddpg.batch_size".into(),
            ));
        }
        if ddpg.history_segments == 0 {
            return Err(ConfigError::Validation(
                "ddpg.history_segments must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a TOML string with all default values (useful for creating
    /// example config files).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&AppConfig::default()).expect("default config serializes")
    }
}
