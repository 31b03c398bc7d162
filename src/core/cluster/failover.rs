// src/core/cluster/failover.rs

//! Failover Coordinator (C6): a guarded PRIMARY/REPLICA state machine driven
//! by an explicit tick, never by a background thread of its own.

use crate::core::errors::LiteFsError;
use crate::core::events::{CoreEvent, EventEmitter, FailoverEvent, FailoverEventKind, PromotionBlockedReason};
use crate::ports::LeaderElection;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// The node's current role in the single-writer replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Primary,
    Replica,
}

/// The inputs a tick evaluates against the transition table (§4.6). Health is
/// not part of `TickInputs` — it is injected out-of-band via `mark_healthy`/
/// `mark_unhealthy` (the caller-owned probe's port), and a tick reads
/// whatever the probe last reported.
#[derive(Debug, Clone, Copy)]
pub struct TickInputs {
    pub elected: bool,
    pub quorum: bool,
}

struct Inner {
    role: NodeRole,
    healthy: bool,
}

/// Bumped around a guarded write so graceful handoff can observe how many
/// writes are in flight without the coordinator knowing anything about SQL.
#[derive(Debug, Default)]
pub struct WriteGuardCounter {
    in_flight: AtomicUsize,
}

impl WriteGuardCounter {
    pub fn begin_write(&self) -> WriteGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        WriteGuard { counter: self }
    }

    pub fn count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// RAII guard returned by `WriteGuardCounter::begin_write`; decrements on drop.
pub struct WriteGuard<'a> {
    counter: &'a WriteGuardCounter,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.counter.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// How long graceful handoff waits for in-flight writes to drain before
/// transitioning anyway (§4.6).
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct FailoverCoordinator {
    election: Arc<dyn LeaderElection>,
    emitter: Arc<dyn EventEmitter>,
    state: Mutex<Inner>,
    writes: WriteGuardCounter,
    drain_timeout: Duration,
}

impl FailoverCoordinator {
    pub fn new(election: Arc<dyn LeaderElection>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self::with_drain_timeout(election, emitter, DEFAULT_DRAIN_TIMEOUT)
    }

    pub fn with_drain_timeout(
        election: Arc<dyn LeaderElection>,
        emitter: Arc<dyn EventEmitter>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            election,
            emitter,
            state: Mutex::new(Inner {
                role: NodeRole::Replica,
                healthy: true,
            }),
            writes: WriteGuardCounter::default(),
            drain_timeout,
        }
    }

    pub fn role(&self) -> NodeRole {
        self.state.lock().role
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.role(), NodeRole::Primary)
    }

    /// Begin tracking an in-flight guarded write; the returned guard must be
    /// held for the duration of the write.
    pub fn begin_write(&self) -> WriteGuard<'_> {
        self.writes.begin_write()
    }

    /// Injected health input (§4.6 "Health input"). A transition that does
    /// not change role emits no event, matching the coordinator's general
    /// idempotence rule.
    pub fn mark_healthy(&self) {
        self.state.lock().healthy = true;
    }

    pub fn mark_unhealthy(&self) {
        self.state.lock().healthy = false;
    }

    /// Evaluates the transition table once against `inputs`, reading health
    /// from whatever `mark_healthy`/`mark_unhealthy` last recorded. The mutex
    /// is held only while reading/writing role and health; the event emitter
    /// is invoked after it is released so a slow subscriber cannot block a
    /// concurrent tick or request.
    pub async fn coordinate_transition(&self, inputs: TickInputs) {
        let transition = {
            let mut state = self.state.lock();
            let from = state.role;
            let healthy = state.healthy;
            let (to, event_kind) = match (from, inputs.elected, healthy, inputs.quorum) {
                (NodeRole::Replica, true, true, true) => (NodeRole::Primary, Some(FailoverEventKind::Promoted)),
                (NodeRole::Replica, true, false, _) => (
                    NodeRole::Replica,
                    Some(FailoverEventKind::PromotionBlocked(PromotionBlockedReason::Health)),
                ),
                (NodeRole::Replica, true, true, false) => (
                    NodeRole::Replica,
                    Some(FailoverEventKind::PromotionBlocked(PromotionBlockedReason::Quorum)),
                ),
                (NodeRole::Replica, false, _, _) => (NodeRole::Replica, None),
                (NodeRole::Primary, true, true, true) => (NodeRole::Primary, None),
                (NodeRole::Primary, false, _, _) => (NodeRole::Replica, Some(FailoverEventKind::Demoted)),
                (NodeRole::Primary, true, false, _) => {
                    (NodeRole::Replica, Some(FailoverEventKind::DemotedForHealth))
                }
                (NodeRole::Primary, true, true, false) => {
                    (NodeRole::Replica, Some(FailoverEventKind::DemotedForQuorumLoss))
                }
            };
            state.role = to;
            event_kind.map(|kind| (kind, from, to))
        };

        if let Some((kind, from, to)) = transition {
            self.emitter
                .emit(CoreEvent::Failover(FailoverEvent::new(kind, from, to)))
                .await;
        }
    }

    /// Operator-initiated demotion of the current primary (§4.6 "Graceful
    /// handoff"). A no-op on a replica.
    pub async fn graceful_handoff(&self) {
        if !self.is_primary() {
            return;
        }

        self.emitter
            .emit(CoreEvent::Failover(FailoverEvent::new(
                FailoverEventKind::HandoffBegin,
                NodeRole::Primary,
                NodeRole::Primary,
            )))
            .await;

        if let Err(e) = self.election.demote_from_leader().await {
            warn!(error = %e, "step-down via leader-election port failed; fencing and transitioning anyway");
        }

        self.wait_for_drain().await;

        {
            let mut state = self.state.lock();
            state.role = NodeRole::Replica;
        }

        self.emitter
            .emit(CoreEvent::Failover(FailoverEvent::new(
                FailoverEventKind::HandoffComplete,
                NodeRole::Primary,
                NodeRole::Replica,
            )))
            .await;
    }

    async fn wait_for_drain(&self) {
        let deadline = Instant::now() + self.drain_timeout;
        while self.writes.count() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    in_flight = self.writes.count(),
                    "graceful handoff deadline reached with writes still in flight; proceeding anyway"
                );
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct NoopElection;

    #[async_trait]
    impl LeaderElection for NoopElection {
        async fn is_leader_elected(&self) -> Result<bool, LiteFsError> {
            Ok(true)
        }
        async fn elect_as_leader(&self) -> Result<(), LiteFsError> {
            Ok(())
        }
        async fn demote_from_leader(&self) -> Result<(), LiteFsError> {
            Ok(())
        }
    }

    struct RecordingEmitter {
        events: StdMutex<Vec<FailoverEventKind>>,
    }

    impl RecordingEmitter {
        fn new() -> Self {
            Self {
                events: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventEmitter for RecordingEmitter {
        async fn emit(&self, event: CoreEvent) {
            if let CoreEvent::Failover(ev) = event {
                self.events.lock().unwrap().push(ev.kind);
            }
        }
    }

    fn coordinator() -> (Arc<RecordingEmitter>, FailoverCoordinator) {
        let emitter = Arc::new(RecordingEmitter::new());
        let coordinator = FailoverCoordinator::new(Arc::new(NoopElection), emitter.clone());
        (emitter, coordinator)
    }

    #[tokio::test]
    async fn promotes_when_elected_healthy_and_quorum() {
        let (emitter, coordinator) = coordinator();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        assert!(coordinator.is_primary());
        assert_eq!(emitter.events.lock().unwrap().as_slice(), &[FailoverEventKind::Promoted]);
    }

    #[tokio::test]
    async fn promotion_blocked_by_quorum_then_promotes_s6() {
        let (emitter, coordinator) = coordinator();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: false,
            })
            .await;
        assert!(!coordinator.is_primary());
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        assert!(coordinator.is_primary());
        let events = emitter.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            FailoverEventKind::PromotionBlocked(PromotionBlockedReason::Quorum)
        ));
        assert_eq!(events[1], FailoverEventKind::Promoted);
    }

    #[tokio::test]
    async fn idempotent_primary_tick_emits_nothing() {
        let (emitter, coordinator) = coordinator();
        let inputs = TickInputs {
            elected: true,
            quorum: true,
        };
        coordinator.coordinate_transition(inputs).await;
        coordinator.coordinate_transition(inputs).await;
        assert_eq!(emitter.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn demoted_when_not_elected() {
        let (emitter, coordinator) = coordinator();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        coordinator
            .coordinate_transition(TickInputs {
                elected: false,
                quorum: true,
            })
            .await;
        assert!(!coordinator.is_primary());
        assert_eq!(
            emitter.events.lock().unwrap().as_slice(),
            &[FailoverEventKind::Promoted, FailoverEventKind::Demoted]
        );
    }

    #[tokio::test]
    async fn promotion_blocked_when_marked_unhealthy() {
        let (emitter, coordinator) = coordinator();
        coordinator.mark_unhealthy();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        assert!(!coordinator.is_primary());
        assert_eq!(
            emitter.events.lock().unwrap().as_slice(),
            &[FailoverEventKind::PromotionBlocked(PromotionBlockedReason::Health)]
        );

        coordinator.mark_healthy();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        assert!(coordinator.is_primary());
    }

    #[tokio::test]
    async fn primary_demoted_for_health_when_marked_unhealthy() {
        let (emitter, coordinator) = coordinator();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        assert!(coordinator.is_primary());

        coordinator.mark_unhealthy();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        assert!(!coordinator.is_primary());
        assert_eq!(
            emitter.events.lock().unwrap().as_slice(),
            &[FailoverEventKind::Promoted, FailoverEventKind::DemotedForHealth]
        );
    }

    #[tokio::test]
    async fn graceful_handoff_on_replica_is_a_no_op() {
        let (emitter, coordinator) = coordinator();
        coordinator.graceful_handoff().await;
        assert!(emitter.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn graceful_handoff_drains_and_transitions() {
        let (emitter, coordinator) = coordinator();
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        assert!(coordinator.is_primary());
        coordinator.graceful_handoff().await;
        assert!(!coordinator.is_primary());
        let events = emitter.events.lock().unwrap();
        assert_eq!(
            events.as_slice(),
            &[
                FailoverEventKind::Promoted,
                FailoverEventKind::HandoffBegin,
                FailoverEventKind::HandoffComplete,
            ]
        );
    }

    #[tokio::test]
    async fn handoff_proceeds_past_drain_deadline_if_writes_outstanding() {
        let emitter = Arc::new(RecordingEmitter::new());
        let coordinator = FailoverCoordinator::with_drain_timeout(
            Arc::new(NoopElection),
            emitter,
            Duration::from_millis(30),
        );
        coordinator
            .coordinate_transition(TickInputs {
                elected: true,
                quorum: true,
            })
            .await;
        let guard = coordinator.begin_write();
        coordinator.graceful_handoff().await;
        assert!(!coordinator.is_primary());
        drop(guard);
    }
}
