use serde::{Deserialize, Serialize};

/// Version of the on-disk checkpoint envelope.
pub const FORMAT_VERSION: u32 = 1;

/// Metrics snapshot of the run that produced a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    pub steps: u64,
    pub total_reward: f64,
    pub mean_reward: f64,
    pub final_sim_time: f64,
    pub mean_throughput: f64,
    #[serde(default)]
    pub timed_out: bool,
}

/// Header stored ahead of the agent state inside every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub agent: String,
    pub algorithm: String,
    pub scenario: String,
    pub n_wifi: u32,
    pub run_index: u32,
    pub seed: u64,
    pub timestamp: u64,
    /// Set on checkpoints exported for evaluation (exploration and learning off).
    #[serde(default)]
    pub evaluation: bool,
    pub metrics: CheckpointMetrics,
}
