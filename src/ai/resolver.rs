use crate::ai::algorithms::{DdpgAgent, DdpgConfig, DqnAgent, DqnConfig};
use crate::ai::SessionAgent;
use crate::error::ConfigError;

/// Identifier of the discrete-control agent.
pub const DQN: &str = "DQN";
/// Identifier of the continuous-control agent.
pub const DDPG: &str = "DDPG";

/// The two supported agent families, each with its own hyperparameters.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentFamily {
    Discrete(DqnConfig),
    Continuous(DdpgConfig),
}

/// A validated agent identifier and the family it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDescriptor {
    pub identifier: String,
    pub family: AgentFamily,
}

/// Resolve an agent identifier against the two supported families.
///
/// Pure: touches no checkpoint, segment or process. Anything other than
/// `DQN` or `DDPG` is rejected.
pub fn resolve_agent(
    identifier: &str,
    dqn: &DqnConfig,
    ddpg: &DdpgConfig,
) -> Result<AgentDescriptor, ConfigError> {
    let family = match identifier {
        DQN => AgentFamily::Discrete(dqn.clone()),
        DDPG => AgentFamily::Continuous(ddpg.clone()),
        other => return Err(ConfigError::UnsupportedAgent(other.to_string())),
    };
    Ok(AgentDescriptor {
        identifier: identifier.to_string(),
        family,
    })
}

impl AgentDescriptor {
    /// Training-algorithm tag, also the tag recorded inside agent state.
    pub fn algorithm_tag(&self) -> &'static str {
        match self.family {
            AgentFamily::Discrete(_) => DQN,
            AgentFamily::Continuous(_) => DDPG,
        }
    }

    /// Action-space name forwarded to the simulator as `agentType`.
    pub fn action_space(&self) -> &'static str {
        match self.family {
            AgentFamily::Discrete(_) => "discrete",
            AgentFamily::Continuous(_) => "continuous",
        }
    }

    /// Instantiate a fresh agent of this family, seeded for one run.
    pub fn build_agent(&self, seed: u64) -> Box<dyn SessionAgent> {
        match &self.family {
            AgentFamily::Discrete(config) => Box::new(DqnAgent::new(config.clone(), seed)),
            AgentFamily::Continuous(config) => Box::new(DdpgAgent::new(config.clone(), seed)),
        }
    }
}
