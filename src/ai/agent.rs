use serde::{Deserialize, Serialize};

use crate::error::AgentStateError;

/// Longest observation history the shared segment can carry.
pub const MAX_HISTORY_LENGTH: usize = 512;

/// Number of contention-window levels the discrete family chooses from.
pub const NO_ACTIONS: u32 = 6;

/// One step's view of the simulated network, as published by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Recent collision probabilities, oldest first.
    pub history: Vec<f32>,
    /// Reward for the previously applied action.
    pub reward: f32,
    pub sim_time: f64,
    pub current_thr: f64,
    pub n_wifi: u32,
}

/// Action returned to the simulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Discrete(u32),
    Continuous(f32),
}

/// One step of experience for replay-based training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: f32,
    pub reward: f32,
    pub next_state: Vec<f32>,
}

/// Serialized agent state for checkpointing. Opaque to everything but the
/// agent that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentState {
    pub data: Vec<u8>,
}

/// Interface the simulator channel drives during a run.
///
/// `act` both learns from the reward carried by the observation (which
/// belongs to the previous action) and picks the next action.
pub trait SessionAgent {
    /// Algorithm tag recorded in checkpoints ("DQN", "DDPG").
    fn algorithm_name(&self) -> &str;

    /// Consume an observation and return the next action.
    fn act(&mut self, observation: &Observation) -> Action;

    /// Number of observations processed over the agent's lifetime.
    fn step_count(&self) -> u64;

    /// Exploration level (epsilon for DQN, noise std for DDPG).
    fn exploration(&self) -> f32;

    /// Serialize the full training state.
    fn save_state(&self) -> Result<AgentState, AgentStateError>;

    /// Restore a state previously produced by `save_state`.
    fn load_state(&mut self, state: &AgentState) -> Result<(), AgentStateError>;

    /// Switch to pure exploitation: no exploration, no learning, no replay.
    fn enter_eval_mode(&mut self);
}

/// Check the algorithm tag embedded in a decoded state.
pub(crate) fn ensure_algorithm(expected: &str, found: &str) -> Result<(), AgentStateError> {
    if expected != found {
        return Err(AgentStateError::AlgorithmMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}
