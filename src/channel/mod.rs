//! Simulator channel: exclusive shared-segment binding per mempool key, the
//! step protocol spoken over it, and the simulators that attach to it.

pub mod endpoint;
pub mod layout;
pub mod loopback;
pub mod segment;
pub mod session;
pub mod simulator;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use endpoint::SimulatorEndpoint;
pub use loopback::{FaultInjection, FaultKind, LoopbackSimulator};
pub use segment::{segment_path, SharedSegment};
pub use session::{ChannelConfig, SimulatorChannel};
pub use simulator::{
    LaunchRequest, Ns3Simulator, Simulator, SimulatorConfig, SimulatorExit, SimulatorKind,
    SimulatorParams, SimulatorProcess,
};

/// Host-wide identifier of the shared segment a simulator binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MempoolKey(pub u32);

impl fmt::Display for MempoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MempoolKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(MempoolKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parse_and_display() {
        let key: MempoolKey = "2333".parse().unwrap();
        assert_eq!(key, MempoolKey(2333));
        assert_eq!(key.to_string(), "2333");
        assert!("abc".parse::<MempoolKey>().is_err());
    }

    #[test]
    fn test_key_serializes_as_integer() {
        let json = serde_json::to_string(&MempoolKey(1234)).unwrap();
        assert_eq!(json, "1234");
    }
}
