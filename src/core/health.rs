// src/core/health.rs

//! Health Probes (C9): liveness, readiness, and detailed status, all pure
//! given the mount, role, and an externally-supplied `HealthState` — the
//! probe does not decide what "degraded" means, only how it maps to HTTP
//! semantics (§4.9).

use crate::core::cluster::failover::NodeRole;
use crate::core::cluster::state::HealthState;
use crate::core::mount::MountObserver;
use crate::core::role::RoleResolver;
use crate::ports::SplitBrainSource;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LivenessStatus {
    pub is_live: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReadinessStatus {
    pub is_ready: bool,
    pub can_accept_writes: bool,
    pub split_brain_detected: bool,
    pub conflicting_leaders: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetailedStatus {
    pub is_primary: bool,
    pub health_status: HealthState,
    pub node_state: NodeRole,
    pub is_ready: bool,
    pub error: Option<String>,
}

pub struct HealthProbe {
    mount: Arc<MountObserver>,
    role: Arc<RoleResolver>,
    split_brain: Option<Arc<dyn SplitBrainSource>>,
}

impl HealthProbe {
    pub fn new(mount: Arc<MountObserver>, role: Arc<RoleResolver>) -> Self {
        Self {
            mount,
            role,
            split_brain: None,
        }
    }

    pub fn with_split_brain_detector(
        mount: Arc<MountObserver>,
        role: Arc<RoleResolver>,
        detector: Arc<dyn SplitBrainSource>,
    ) -> Self {
        Self {
            mount,
            role,
            split_brain: Some(detector),
        }
    }

    /// Fails only when the mount is absent; degraded/unhealthy states still
    /// report live (§4.9 "Liveness").
    pub fn liveness(&self) -> LivenessStatus {
        if self.mount.mount_exists() {
            LivenessStatus {
                is_live: true,
                error: None,
            }
        } else {
            LivenessStatus {
                is_live: false,
                error: Some(format!(
                    "mount path {} is not accessible",
                    self.mount.mount_path().display()
                )),
            }
        }
    }

    /// Role-aware readiness, per the table in §4.9.
    pub async fn readiness(&self, health: HealthState) -> ReadinessStatus {
        if !self.mount.mount_exists() {
            return ReadinessStatus {
                error: Some(format!(
                    "mount path {} is not accessible",
                    self.mount.mount_path().display()
                )),
                ..Default::default()
            };
        }

        if let Some(detector) = &self.split_brain {
            if let Ok(Some(leaders)) = detector.check().await {
                return ReadinessStatus {
                    split_brain_detected: true,
                    conflicting_leaders: leaders,
                    ..Default::default()
                };
            }
        }

        let is_primary = self.role.is_primary().await;
        let (is_ready, can_accept_writes) = match (is_primary, health) {
            (true, HealthState::Healthy) => (true, true),
            (true, HealthState::Degraded | HealthState::Unhealthy) => (false, false),
            (false, HealthState::Healthy | HealthState::Degraded) => (true, false),
            (false, HealthState::Unhealthy) => (false, false),
        };

        ReadinessStatus {
            is_ready,
            can_accept_writes,
            split_brain_detected: false,
            conflicting_leaders: Vec::new(),
            error: None,
        }
    }

    /// Full snapshot: role, health, node state, readiness, and an error
    /// field when the mount is down (§4.9 "Detailed status").
    pub async fn detailed_status(&self, health: HealthState) -> DetailedStatus {
        if !self.mount.mount_exists() {
            return DetailedStatus {
                is_primary: false,
                health_status: HealthState::Unhealthy,
                node_state: NodeRole::Replica,
                is_ready: false,
                error: Some(format!(
                    "mount path {} is not accessible",
                    self.mount.mount_path().display()
                )),
            };
        }

        let is_primary = self.role.is_primary().await;
        let readiness = self.readiness(health).await;
        DetailedStatus {
            is_primary,
            health_status: health,
            node_state: if is_primary {
                NodeRole::Primary
            } else {
                NodeRole::Replica
            },
            is_ready: readiness.is_ready,
            error: readiness.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::core::errors::LiteFsError;
    use tempfile::TempDir;

    struct AlwaysSplitBrain;

    #[async_trait]
    impl SplitBrainSource for AlwaysSplitBrain {
        async fn check(&self) -> Result<Option<Vec<String>>, LiteFsError> {
            Ok(Some(vec!["a".to_string(), "b".to_string()]))
        }
        async fn has_resolved(&self) -> bool {
            false
        }
    }

    fn probe_for(hostname_match: bool) -> (TempDir, HealthProbe) {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let local = if hostname_match { "node1" } else { "node2" };
        let role = Arc::new(RoleResolver::new_static(mount.clone(), "node1", local));
        (dir, HealthProbe::new(mount, role))
    }

    #[tokio::test]
    async fn liveness_fails_only_when_mount_is_absent() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let mount = Arc::new(MountObserver::new(&missing));
        let role = Arc::new(RoleResolver::new_static(mount.clone(), "node1", "node1"));
        let probe = HealthProbe::new(mount, role);
        let status = probe.liveness();
        assert!(!status.is_live);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn primary_healthy_is_ready_and_accepts_writes() {
        let (_dir, probe) = probe_for(true);
        let status = probe.readiness(HealthState::Healthy).await;
        assert!(status.is_ready);
        assert!(status.can_accept_writes);
    }

    #[tokio::test]
    async fn primary_degraded_is_not_ready() {
        let (_dir, probe) = probe_for(true);
        let status = probe.readiness(HealthState::Degraded).await;
        assert!(!status.is_ready);
        assert!(!status.can_accept_writes);
    }

    #[tokio::test]
    async fn replica_degraded_is_still_ready_but_cannot_write() {
        let (_dir, probe) = probe_for(false);
        let status = probe.readiness(HealthState::Degraded).await;
        assert!(status.is_ready);
        assert!(!status.can_accept_writes);
    }

    #[tokio::test]
    async fn replica_unhealthy_is_not_ready() {
        let (_dir, probe) = probe_for(false);
        let status = probe.readiness(HealthState::Unhealthy).await;
        assert!(!status.is_ready);
    }

    #[tokio::test]
    async fn split_brain_overrides_readiness_regardless_of_role() {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let role = Arc::new(RoleResolver::new_static(mount.clone(), "node1", "node1"));
        let probe = HealthProbe::with_split_brain_detector(mount, role, Arc::new(AlwaysSplitBrain));
        let status = probe.readiness(HealthState::Healthy).await;
        assert!(!status.is_ready);
        assert!(status.split_brain_detected);
        assert_eq!(status.conflicting_leaders.len(), 2);
    }

    #[tokio::test]
    async fn detailed_status_reports_mount_down_as_unhealthy() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let mount = Arc::new(MountObserver::new(&missing));
        let role = Arc::new(RoleResolver::new_static(mount.clone(), "node1", "node1"));
        let probe = HealthProbe::new(mount, role);
        let status = probe.detailed_status(HealthState::Healthy).await;
        assert_eq!(status.health_status, HealthState::Unhealthy);
        assert!(status.error.is_some());
        assert!(!status.is_ready);
    }
}
