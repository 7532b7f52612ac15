use std::path::PathBuf;

use crate::channel::MempoolKey;

/// Errors that can occur when loading configuration or resolving a campaign.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),

    #[error("unsupported agent '{0}' (expected 'DQN' or 'DDPG')")]
    UnsupportedAgent(String),

    #[error("{what} not found: {path}")]
    MissingPath { what: &'static str, path: PathBuf },
}

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(PathBuf),

    #[error("checkpoint {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to list checkpoint directory {dir}: {source}")]
    List {
        dir: PathBuf,
        source: std::io::Error,
    },
}

/// Errors raised by the simulator channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("mempool key {key} is already bound by a live process")]
    Unavailable { key: MempoolKey },

    #[error("failed to launch simulator: {0}")]
    Launch(String),

    #[error("simulator crashed: {0}")]
    SimulatorCrash(String),

    #[error("run interrupted while the simulator was running")]
    Interrupted,

    #[error("segment I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when (de)serializing agent state.
#[derive(Debug, thiserror::Error)]
pub enum AgentStateError {
    #[error("failed to encode agent state: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode agent state: {0}")]
    Decode(serde_json::Error),

    #[error("agent state belongs to {found}, expected {expected}")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("agent {0} contain non-finite values")]
    NonFinite(&'static str),
}

/// The reason a campaign halted.
#[derive(Debug, thiserror::Error)]
pub enum CampaignFailure {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("campaign cancelled before the run started")]
    Cancelled,
}

/// A halted campaign: which run (if any) failed, and why.
#[derive(Debug, thiserror::Error)]
#[error("{} at {}: {failure}", .failure.kind(), run_label(.run_index))]
pub struct CampaignError {
    pub run_index: Option<u32>,
    pub failure: CampaignFailure,
}

fn run_label(run_index: &Option<u32>) -> String {
    match run_index {
        Some(i) => format!("run {i}"),
        None => "pre-flight".to_string(),
    }
}

impl CampaignError {
    pub fn preflight(failure: impl Into<CampaignFailure>) -> Self {
        CampaignError {
            run_index: None,
            failure: failure.into(),
        }
    }

    pub fn at_run(run_index: u32, failure: impl Into<CampaignFailure>) -> Self {
        CampaignError {
            run_index: Some(run_index),
            failure: failure.into(),
        }
    }

    /// Process exit code for this failure.
    ///
    /// Configuration problems share code 2 with CLI usage errors so automation
    /// can tell a bad invocation apart from a failed training run (3).
    pub fn exit_code(&self) -> i32 {
        match self.failure {
            CampaignFailure::Config(_) => 2,
            CampaignFailure::Cancelled | CampaignFailure::Channel(ChannelError::Interrupted) => 130,
            CampaignFailure::Checkpoint(_) | CampaignFailure::Channel(_) => 3,
        }
    }
}

impl CampaignFailure {
    /// Error kind name as reported to the operator.
    pub fn kind(&self) -> &'static str {
        match self {
            CampaignFailure::Config(ConfigError::UnsupportedAgent(_)) => "UnsupportedAgentError",
            CampaignFailure::Config(_) => "ConfigurationError",
            CampaignFailure::Checkpoint(CheckpointError::NotFound(_)) => "CheckpointNotFoundError",
            CampaignFailure::Checkpoint(
                CheckpointError::Corrupt { .. }
                | CheckpointError::Read { .. }
                | CheckpointError::List { .. },
            ) => "CheckpointCorruptError",
            CampaignFailure::Checkpoint(CheckpointError::Write { .. }) => "CheckpointWriteError",
            CampaignFailure::Channel(ChannelError::Unavailable { .. }) => "ChannelUnavailableError",
            CampaignFailure::Channel(_) => "SimulatorCrashError",
            CampaignFailure::Cancelled => "Cancelled",
        }
    }
}
