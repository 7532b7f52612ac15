mod ddpg;
mod dqn;

pub use ddpg::{DdpgAgent, DdpgConfig};
pub use dqn::{DqnAgent, DqnConfig};
