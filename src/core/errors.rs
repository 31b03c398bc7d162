// src/core/errors.rs

//! Defines the primary error type for the LiteFS coordination core.

use thiserror::Error;

/// The main error enum for the core. Using `thiserror` gives each variant a
/// stable `Display` message and preserves the originating cause via `#[source]`
/// so operators can trace a rejection back to the filesystem or transport error
/// that produced it.
#[derive(Error, Debug)]
pub enum LiteFsError {
    /// An invariant was violated while constructing `ClusterSettings` or one of
    /// its sub-objects. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The replication daemon's mount point is missing at runtime.
    #[error("infrastructure unavailable: mount path {path} is not accessible")]
    InfrastructureUnavailable {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A write was attempted while the local node is not primary.
    #[error("not primary: this node is a replica, writes must go to the primary")]
    NotPrimary,

    /// A write was attempted while the cluster observed two or more leaders.
    #[error("split-brain detected: {leader_count} nodes claim leadership")]
    SplitBrain { leader_count: usize },

    /// An outbound forward to the primary failed at the transport layer.
    #[error("transport error forwarding to primary: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// An outbound forward to the primary exceeded its read timeout.
    #[error("timeout waiting for primary response")]
    Timeout,

    /// The circuit breaker is open and rejected the attempt before dialing out.
    #[error("circuit breaker open, retry after {retry_after_secs}s")]
    BreakerOpen { retry_after_secs: u64 },
}

impl LiteFsError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn infrastructure_unavailable(path: impl Into<String>) -> Self {
        Self::InfrastructureUnavailable {
            path: path.into(),
            source: None,
        }
    }

    pub fn infrastructure_unavailable_with(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::InfrastructureUnavailable {
            path: path.into(),
            source: Some(source),
        }
    }

    /// `true` for kinds that surface as request rejections rather than internal
    /// failures — used by callers deciding whether to log at `warn` or `error`.
    pub fn is_write_rejection(&self) -> bool {
        matches!(self, Self::NotPrimary | Self::SplitBrain { .. })
    }
}

pub type Result<T> = std::result::Result<T, LiteFsError>;
