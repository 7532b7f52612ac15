//! # rl-campaign
//!
//! Orchestrates checkpoint-chained reinforcement-learning training campaigns
//! against an out-of-process network simulator reached through a
//! shared-memory segment.
//!
//! ## Modules
//!
//! - [`ai`]: Agent trait, agent-family resolution, DQN and DDPG learners
//! - [`channel`]: Mempool-key segment binding, step protocol, simulators
//! - [`checkpoint`]: Convention-named, compressed, atomically written checkpoints
//! - [`training`]: Seed sequencing, run planning, campaign state machine
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

pub mod ai;
pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod training;
