// src/core/cluster/mod.rs

pub mod failover;
pub mod split_brain;
pub mod state;

pub use failover::{FailoverCoordinator, NodeRole, TickInputs};
pub use split_brain::SplitBrainDetector;
pub use state::{HealthState, RaftClusterState, RaftNodeState};
