// src/core/role.rs

//! Role Resolver (C3): determines primary/replica role under static or
//! consensus (raft) leader election, and presents a uniform query interface
//! to higher layers regardless of mode.

use crate::core::errors::LiteFsError;
use crate::core::mount::MountObserver;
use crate::ports::{LeaderElection, PrimaryDetector};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// The resolver's belief about the local node's role. `Unknown` is distinct
/// from `Replica` internally (it means "the raft port could not be
/// reached"), but every caller must treat it as replica for safety (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleBelief {
    Primary,
    Replica,
    Unknown,
}

impl RoleBelief {
    /// Collapses `Unknown` to `false`, the safe default everywhere outside
    /// this module.
    pub fn as_primary_bool(self) -> bool {
        matches!(self, RoleBelief::Primary)
    }
}

enum Mode {
    Static {
        primary_hostname: String,
        local_hostname: String,
    },
    Raft {
        election: Arc<dyn LeaderElection>,
    },
}

/// Presents a single `is_primary()`/`primary_url()` interface over either a
/// static hostname comparison or a raft leader-election port.
pub struct RoleResolver {
    mount: Arc<MountObserver>,
    mode: Mode,
}

impl RoleResolver {
    /// Static mode: `primary_hostname` and `local_hostname` are compared
    /// byte-exact, case-sensitive, with no normalization (§8 property 8).
    /// `local_hostname` is supplied by the caller because obtaining it is a
    /// platform concern, not something the core should guess at.
    pub fn new_static(
        mount: Arc<MountObserver>,
        primary_hostname: impl Into<String>,
        local_hostname: impl Into<String>,
    ) -> Self {
        Self {
            mount,
            mode: Mode::Static {
                primary_hostname: primary_hostname.into(),
                local_hostname: local_hostname.into(),
            },
        }
    }

    /// Raft mode: role is delegated entirely to the leader-election port.
    pub fn new_raft(mount: Arc<MountObserver>, election: Arc<dyn LeaderElection>) -> Self {
        Self {
            mount,
            mode: Mode::Raft { election },
        }
    }

    /// The resolver's current belief about the local node's role.
    pub async fn role_belief(&self) -> RoleBelief {
        match &self.mode {
            Mode::Static {
                primary_hostname,
                local_hostname,
            } => {
                if primary_hostname == local_hostname {
                    RoleBelief::Primary
                } else {
                    RoleBelief::Replica
                }
            }
            Mode::Raft { election } => match election.is_leader_elected().await {
                Ok(true) => RoleBelief::Primary,
                Ok(false) => RoleBelief::Replica,
                Err(e) => {
                    warn!(error = %e, "leader-election port unreachable; reporting role as unknown");
                    RoleBelief::Unknown
                }
            },
        }
    }

    /// `true` iff the local node is primary; `Unknown` collapses to `false`.
    pub async fn is_primary(&self) -> bool {
        self.role_belief().await.as_primary_bool()
    }

    /// The primary's URL, taken from the mount's `.primary` marker. `None`
    /// both when no primary is elected and when the marker names this node.
    pub async fn primary_url(&self) -> Option<String> {
        match self.mount.read_primary_marker().await {
            Ok(marker) => marker.primary_url().map(str::to_string),
            Err(e) => {
                debug!(error = %e, "could not read primary marker while resolving primary_url");
                None
            }
        }
    }
}

/// `RoleResolver` is the Primary Detector port's (§6) production
/// implementation: anywhere the core needs "is the local node primary?"
/// without depending on the resolver's static/raft mode, it depends on this
/// trait instead.
#[async_trait]
impl PrimaryDetector for RoleResolver {
    async fn is_primary(&self) -> Result<bool, LiteFsError> {
        Ok(RoleResolver::is_primary(self).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::LiteFsError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FakeElection {
        result: Result<bool, ()>,
    }

    #[async_trait]
    impl LeaderElection for FakeElection {
        async fn is_leader_elected(&self) -> Result<bool, LiteFsError> {
            self.result
                .clone()
                .map_err(|_| LiteFsError::configuration("unreachable"))
        }
        async fn elect_as_leader(&self) -> Result<(), LiteFsError> {
            Ok(())
        }
        async fn demote_from_leader(&self) -> Result<(), LiteFsError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn static_mode_is_byte_exact() {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let resolver = RoleResolver::new_static(mount.clone(), "node1", "node1");
        assert!(resolver.is_primary().await);

        let resolver = RoleResolver::new_static(mount.clone(), "node1", "Node1");
        assert!(!resolver.is_primary().await, "case differs, must not match");

        let resolver = RoleResolver::new_static(mount.clone(), "node1", "node1.internal");
        assert!(!resolver.is_primary().await, "FQDN vs short must not match");

        let resolver = RoleResolver::new_static(mount, "node1", "node10");
        assert!(!resolver.is_primary().await, "substring must not match");
    }

    #[tokio::test]
    async fn raft_mode_delegates_to_port() {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let resolver = RoleResolver::new_raft(
            mount,
            Arc::new(FakeElection { result: Ok(true) }),
        );
        assert!(resolver.is_primary().await);
    }

    #[tokio::test]
    async fn raft_mode_unreachable_port_is_treated_as_replica() {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let resolver = RoleResolver::new_raft(
            mount,
            Arc::new(FakeElection { result: Err(()) }),
        );
        assert_eq!(resolver.role_belief().await, RoleBelief::Unknown);
        assert!(!resolver.is_primary().await);
    }

    #[tokio::test]
    async fn satisfies_the_primary_detector_port() {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let resolver: Arc<dyn PrimaryDetector> =
            Arc::new(RoleResolver::new_static(mount, "node1", "node1"));
        assert!(resolver.is_primary().await.unwrap());
    }
}
