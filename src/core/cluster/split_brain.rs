// src/core/cluster/split_brain.rs

//! Split-Brain Detector (C5): from a cluster snapshot, identifies whether
//! multiple nodes claim leadership, and exposes detection/resolution
//! signals. A no-op in static mode — there is nothing to compare against.

use crate::core::cluster::state::RaftClusterState;
use crate::core::errors::LiteFsError;
use crate::core::events::SplitBrainEvent;
use crate::ports::{NodeIdResolver, RaftLeaderElection, SplitBrainSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::warn;

enum Mode {
    /// Only raft mode has multiple leaders to compare; static mode always
    /// reports "no split-brain".
    Static,
    Raft {
        election: Arc<dyn RaftLeaderElection>,
        node_id: Arc<dyn NodeIdResolver>,
    },
}

/// Tracks whether split-brain was previously detected and the last observed
/// snapshot, so `has_resolved()` can answer "was there a detection, followed
/// by a healthier snapshot?" without re-querying the port.
struct LastSeen {
    snapshot: Option<RaftClusterState>,
}

pub struct SplitBrainDetector {
    mode: Mode,
    last_seen: Mutex<LastSeen>,
    ever_detected: AtomicBool,
}

impl SplitBrainDetector {
    pub fn new_static() -> Self {
        Self {
            mode: Mode::Static,
            last_seen: Mutex::new(LastSeen { snapshot: None }),
            ever_detected: AtomicBool::new(false),
        }
    }

    pub fn new_raft(election: Arc<dyn RaftLeaderElection>, node_id: Arc<dyn NodeIdResolver>) -> Self {
        Self {
            mode: Mode::Raft { election, node_id },
            last_seen: Mutex::new(LastSeen { snapshot: None }),
            ever_detected: AtomicBool::new(false),
        }
    }

    /// Queries the current cluster snapshot and returns a detection event
    /// iff two or more leaders are observed. Propagates errors from the
    /// leader-election port — callers that must fail closed (the
    /// write-path guard) should use this directly; callers that should
    /// fail open (request middleware) should go through the
    /// `SplitBrainSource` port implementation below instead.
    pub async fn check_raw(&self) -> Result<Option<SplitBrainEvent>, LiteFsError> {
        let Mode::Raft { election, node_id } = &self.mode else {
            return Ok(None);
        };

        let snapshot = election.get_cluster_state().await?;
        let leader_count = snapshot.count_leaders();

        if snapshot.is_leaderless() {
            warn!("cluster currently has no elected leader");
        }

        let event = if snapshot.has_split_brain() {
            self.ever_detected.store(true, Ordering::Relaxed);
            let conflicting_leaders: Vec<String> = snapshot
                .leaders_detected()
                .into_iter()
                .map(str::to_string)
                .collect();
            Some(SplitBrainEvent {
                detected_at: SystemTime::now(),
                cluster_snapshot: snapshot.clone(),
                detected_by_node: node_id.resolve_node_id()?,
                conflicting_leaders,
            })
        } else {
            None
        };

        debug_assert!(event.is_none() || leader_count >= 2);
        self.last_seen.lock().snapshot = Some(snapshot);
        Ok(event)
    }

    /// `true` iff a previous detection has since been followed by a
    /// snapshot with at most one leader.
    pub async fn has_resolved(&self) -> bool {
        if !self.ever_detected.load(Ordering::Relaxed) {
            return false;
        }
        self.last_seen
            .lock()
            .snapshot
            .as_ref()
            .map(|s| s.count_leaders() <= 1)
            .unwrap_or(false)
    }
}

#[async_trait]
impl SplitBrainSource for SplitBrainDetector {
    async fn check(&self) -> Result<Option<Vec<String>>, LiteFsError> {
        match self.check_raw().await {
            Ok(Some(event)) => Ok(Some(event.conflicting_leaders)),
            Ok(None) => Ok(None),
            Err(e) => {
                // Fail-open: detection failures must not block middleware.
                warn!(error = %e, "split-brain detection query failed; allowing request");
                Ok(None)
            }
        }
    }

    async fn has_resolved(&self) -> bool {
        SplitBrainDetector::has_resolved(self).await
    }
}
