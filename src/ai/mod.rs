mod agent;
pub mod algorithms;
pub mod resolver;
pub mod state_encoding;

pub use agent::{
    Action, AgentState, Observation, SessionAgent, Transition, MAX_HISTORY_LENGTH, NO_ACTIONS,
};
pub use algorithms::{DdpgAgent, DdpgConfig, DqnAgent, DqnConfig};
pub use resolver::{resolve_agent, AgentDescriptor, AgentFamily};
