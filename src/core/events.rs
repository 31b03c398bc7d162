// src/core/events.rs

//! Typed event emission for failover transitions and split-brain detections.
//!
//! Components never log-and-forget directly; they hand typed events to an
//! `EventEmitter` port so that a process can fan them out to logs, metrics, or
//! an operator-facing stream without the coordinator or detector knowing who is
//! listening.

use crate::core::cluster::failover::NodeRole;
use crate::core::cluster::state::RaftClusterState;
use async_trait::async_trait;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// The capacity of the broadcast channel used by `BroadcastEventBus`.
/// Generous enough to absorb a burst of split-brain detections and failover
/// retries without a slow subscriber stalling the coordinator.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Why a promotion attempt was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionBlockedReason {
    Health,
    Quorum,
}

impl std::fmt::Display for PromotionBlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Health => write!(f, "health"),
            Self::Quorum => write!(f, "quorum"),
        }
    }
}

/// The kind of failover transition observed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverEventKind {
    Promoted,
    Demoted,
    DemotedForHealth,
    DemotedForQuorumLoss,
    HandoffBegin,
    HandoffComplete,
    PromotionBlocked(PromotionBlockedReason),
}

/// A single observable role transition (or blocked transition) of the
/// Failover Coordinator.
#[derive(Debug, Clone)]
pub struct FailoverEvent {
    pub kind: FailoverEventKind,
    pub from_state: NodeRole,
    pub to_state: NodeRole,
    pub reason: Option<String>,
    pub timestamp: SystemTime,
}

impl FailoverEvent {
    pub fn new(kind: FailoverEventKind, from_state: NodeRole, to_state: NodeRole) -> Self {
        let reason = match kind {
            FailoverEventKind::PromotionBlocked(r) => Some(r.to_string()),
            _ => None,
        };
        Self {
            kind,
            from_state,
            to_state,
            reason,
            timestamp: SystemTime::now(),
        }
    }
}

/// A detection that two or more nodes simultaneously believe they are primary.
#[derive(Debug, Clone)]
pub struct SplitBrainEvent {
    pub detected_at: SystemTime,
    pub cluster_snapshot: RaftClusterState,
    pub detected_by_node: String,
    pub conflicting_leaders: Vec<String>,
}

/// An event emitted by the core. Subscribers are invoked synchronously in
/// registration order but must never be allowed to fail the caller.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Failover(FailoverEvent),
    SplitBrain(SplitBrainEvent),
}

/// Fire-and-forget sink for core events. Implementations must never raise;
/// a failing subscriber is the subscriber's problem, not the emitter's.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(&self, event: CoreEvent);
}

/// The library default: logs each event at the level its kind warrants and
/// allocates nothing. Most embedders never need more than this.
#[derive(Debug, Default)]
pub struct TracingEventEmitter;

#[async_trait]
impl EventEmitter for TracingEventEmitter {
    async fn emit(&self, event: CoreEvent) {
        match event {
            CoreEvent::Failover(ev) => match ev.kind {
                FailoverEventKind::Promoted => {
                    info!(from = ?ev.from_state, to = ?ev.to_state, "node promoted to primary");
                }
                FailoverEventKind::Demoted => {
                    info!(from = ?ev.from_state, to = ?ev.to_state, "node demoted to replica");
                }
                FailoverEventKind::DemotedForHealth => {
                    warn!(from = ?ev.from_state, to = ?ev.to_state, "node demoted: health check failed");
                }
                FailoverEventKind::DemotedForQuorumLoss => {
                    warn!(from = ?ev.from_state, to = ?ev.to_state, "node demoted: quorum lost");
                }
                FailoverEventKind::HandoffBegin => {
                    info!("graceful handoff starting");
                }
                FailoverEventKind::HandoffComplete => {
                    info!("graceful handoff complete");
                }
                FailoverEventKind::PromotionBlocked(reason) => {
                    warn!(%reason, "promotion blocked");
                }
            },
            CoreEvent::SplitBrain(ev) => {
                warn!(
                    detected_by = %ev.detected_by_node,
                    leaders = ?ev.conflicting_leaders,
                    "split-brain detected"
                );
            }
        }
    }
}

/// Fans events out over a `tokio::sync::broadcast` channel so multiple
/// subscribers (a logging sink, a metrics sink, an operator-facing `/events`
/// stream) can observe the same sequence. A lagging subscriber drops to the
/// oldest event still buffered rather than stalling the emitter.
#[derive(Debug)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventEmitter for BroadcastEventBus {
    async fn emit(&self, event: CoreEvent) {
        if self.sender.send(event).is_err() {
            debug!("emitted a core event with no active subscribers");
        }
    }
}
