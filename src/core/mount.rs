// src/core/mount.rs

//! Mount Observer (C2): observes the replication daemon's mount point —
//! whether the mount is alive, and what the `.primary` marker says.

use crate::core::errors::LiteFsError;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PRIMARY_MARKER_NAME: &str = ".primary";
const FENCED_MARKER_NAME: &str = ".primary.blocked";

/// What the `.primary` marker on the mount currently says (§6 "Marker-file
/// protocol").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryMarker {
    /// No marker file: no primary elected.
    Absent,
    /// Marker present, empty: this node is primary.
    PresentEmpty,
    /// Marker present with content: another node (named by the content) is
    /// primary.
    Present(String),
}

impl PrimaryMarker {
    /// The URL/host:port of the primary, when it is some other node; `None`
    /// both when the marker is absent and when it names this node (empty
    /// content), matching §4.3's `primary_url()` contract.
    pub fn primary_url(&self) -> Option<&str> {
        match self {
            PrimaryMarker::Present(addr) => Some(addr.as_str()),
            PrimaryMarker::Absent | PrimaryMarker::PresentEmpty => None,
        }
    }
}

struct CachedObservation {
    marker: PrimaryMarker,
    observed_at: Instant,
}

/// Observes the mount point. Each call re-observes by default; construct
/// with `with_ttl` to cache the last observation for up to `ttl`.
pub struct MountObserver {
    mount_path: PathBuf,
    ttl: Duration,
    cache: RwLock<Option<CachedObservation>>,
}

impl MountObserver {
    pub fn new(mount_path: impl Into<PathBuf>) -> Self {
        Self {
            mount_path: mount_path.into(),
            ttl: Duration::ZERO,
            cache: RwLock::new(None),
        }
    }

    /// `ttl` of `Duration::ZERO` disables caching, matching the default.
    pub fn with_ttl(mount_path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            mount_path: mount_path.into(),
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub fn mount_path(&self) -> &Path {
        &self.mount_path
    }

    /// Directory at the configured mount path exists and is accessible.
    pub fn mount_exists(&self) -> bool {
        self.mount_path.is_dir()
    }

    /// Reads the current state of the `.primary` marker, honoring the TTL
    /// cache if configured. Raises `InfrastructureUnavailable` if the mount
    /// itself is missing.
    pub async fn read_primary_marker(&self) -> Result<PrimaryMarker, LiteFsError> {
        if self.ttl > Duration::ZERO {
            if let Some(cached) = self.cache.read().as_ref() {
                if cached.observed_at.elapsed() < self.ttl {
                    return Ok(cached.marker.clone());
                }
            }
        }

        if !self.mount_exists() {
            return Err(LiteFsError::infrastructure_unavailable(
                self.mount_path.display().to_string(),
            ));
        }

        let marker_path = self.mount_path.join(PRIMARY_MARKER_NAME);
        let marker = match tokio::fs::read(&marker_path).await {
            Ok(bytes) if bytes.is_empty() => PrimaryMarker::PresentEmpty,
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes).trim().to_string();
                PrimaryMarker::Present(content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PrimaryMarker::Absent,
            Err(e) => {
                return Err(LiteFsError::infrastructure_unavailable_with(
                    marker_path.display().to_string(),
                    e,
                ));
            }
        };

        if self.ttl > Duration::ZERO {
            *self.cache.write() = Some(CachedObservation {
                marker: marker.clone(),
                observed_at: Instant::now(),
            });
        }

        Ok(marker)
    }

    /// Moves `.primary` to `.primary.blocked` so the filesystem rejects
    /// writes regardless of role belief. Idempotent: a missing source is not
    /// an error.
    pub async fn fence(&self) -> Result<(), LiteFsError> {
        let src = self.mount_path.join(PRIMARY_MARKER_NAME);
        let dst = self.mount_path.join(FENCED_MARKER_NAME);
        match tokio::fs::rename(&src, &dst).await {
            Ok(()) => {
                debug!(from = %src.display(), to = %dst.display(), "fenced primary marker");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("fence requested but no primary marker was present; treating as already fenced");
            }
            Err(e) => {
                warn!(error = %e, "failed to fence primary marker");
                return Err(LiteFsError::infrastructure_unavailable_with(
                    src.display().to_string(),
                    e,
                ));
            }
        }
        if self.ttl > Duration::ZERO {
            *self.cache.write() = None;
        }
        Ok(())
    }
}
