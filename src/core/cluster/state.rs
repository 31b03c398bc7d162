// src/core/cluster/state.rs

//! Cluster-State Model (C4): immutable value objects describing each node's
//! self-belief and the aggregate cluster snapshot, plus their pure
//! derivations. This is the vocabulary C5 and C6 are built on.

use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;

/// One raft node's self-reported belief, as gossiped through the
/// leader-election port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftNodeState {
    pub node_id: String,
    pub believes_is_leader: bool,
    pub election_term: u64,
    pub last_heartbeat_ts: Option<SystemTime>,
}

impl RaftNodeState {
    /// Validating constructor: `node_id` must be non-empty/non-whitespace,
    /// and a leader must report no heartbeat (it receives none from
    /// itself).
    pub fn new(
        node_id: impl Into<String>,
        believes_is_leader: bool,
        election_term: u64,
        last_heartbeat_ts: Option<SystemTime>,
    ) -> Result<Self, String> {
        let node_id = node_id.into();
        if node_id.trim().is_empty() {
            return Err("node_id must not be empty or whitespace".to_string());
        }
        if believes_is_leader && last_heartbeat_ts.is_some() {
            return Err("a node that believes it is leader must have no last_heartbeat_ts".to_string());
        }
        Ok(Self {
            node_id,
            believes_is_leader,
            election_term,
            last_heartbeat_ts,
        })
    }
}

/// The aggregate cluster snapshot observed at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftClusterState {
    pub members: HashMap<String, RaftNodeState>,
    pub quorum_size: usize,
}

impl RaftClusterState {
    /// Validating constructor: `members` must be non-empty, and
    /// `quorum_size` must fall in `[1, |members|]`.
    pub fn new(members: HashMap<String, RaftNodeState>, quorum_size: usize) -> Result<Self, String> {
        if members.is_empty() {
            return Err("members must not be empty".to_string());
        }
        if quorum_size == 0 || quorum_size > members.len() {
            return Err(format!(
                "quorum_size must be in [1, {}], got {quorum_size}",
                members.len()
            ));
        }
        Ok(Self {
            members,
            quorum_size,
        })
    }

    /// Node ids that currently believe themselves to be leader.
    pub fn leaders_detected(&self) -> BTreeSet<&str> {
        self.members
            .values()
            .filter(|n| n.believes_is_leader)
            .map(|n| n.node_id.as_str())
            .collect()
    }

    pub fn count_leaders(&self) -> usize {
        self.members.values().filter(|n| n.believes_is_leader).count()
    }

    pub fn has_split_brain(&self) -> bool {
        self.count_leaders() >= 2
    }

    pub fn is_leaderless(&self) -> bool {
        self.count_leaders() == 0
    }

    pub fn has_single_leader(&self) -> bool {
        self.count_leaders() == 1
    }
}

/// The coordinator's health input (§3 "Health state"). Derived from two
/// independent flags; `unhealthy` dominates `degraded` dominates `healthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn from_flags(is_unhealthy: bool, is_degraded: bool) -> Self {
        if is_unhealthy {
            HealthState::Unhealthy
        } else if is_degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    pub fn is_healthy(self) -> bool {
        matches!(self, HealthState::Healthy)
    }
}
