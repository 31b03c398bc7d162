// src/ports.rs

//! External collaborator contracts (§6). The core depends only on these
//! traits; concrete adapters (a real Raft client, a SQLite driver, a real
//! reqwest-backed HTTP client) are supplied by the embedding application.
//!
//! Each port documents its failure policy because that policy differs: some
//! ports fail-open (the caller proceeds, logging the error), others fail
//! closed (the caller refuses rather than risk corruption). See §7.

use crate::core::cluster::state::RaftClusterState;
use crate::core::errors::LiteFsError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves whether the local node currently believes itself to be primary.
/// May raise `LiteFsError::InfrastructureUnavailable` if the underlying
/// observation mechanism (e.g. the mount) cannot be reached.
#[async_trait]
pub trait PrimaryDetector: Send + Sync {
    async fn is_primary(&self) -> Result<bool, LiteFsError>;
}

/// Resolves the stable identifier of the local node. Raises
/// `LiteFsError::Configuration` if no identifier can be determined.
pub trait NodeIdResolver: Send + Sync {
    fn resolve_node_id(&self) -> Result<String, LiteFsError>;
}

/// The base leader-election capability set, available in both static and
/// raft modes. Implementations that cannot currently answer must return an
/// `Err`; callers treat an error identically to "unknown" and stay REPLICA —
/// never infer leadership from a failure.
#[async_trait]
pub trait LeaderElection: Send + Sync {
    async fn is_leader_elected(&self) -> Result<bool, LiteFsError>;
    async fn elect_as_leader(&self) -> Result<(), LiteFsError>;
    async fn demote_from_leader(&self) -> Result<(), LiteFsError>;
}

/// The additional capabilities a raft-backed leader-election implementation
/// exposes: quorum state, cluster membership, and split-brain visibility.
#[async_trait]
pub trait RaftLeaderElection: LeaderElection {
    async fn is_quorum_reached(&self) -> Result<bool, LiteFsError>;
    async fn get_cluster_members(&self) -> Result<Vec<String>, LiteFsError>;
    async fn get_cluster_state(&self) -> Result<RaftClusterState, LiteFsError>;
    async fn detect_split_brain(&self) -> Result<bool, LiteFsError>;
    async fn get_election_timeout_ms(&self) -> Result<u64, LiteFsError>;
}

/// A source of split-brain detection the write-path guard and the request
/// middleware can query without depending on the concrete `SplitBrainDetector`
/// (§4.5) directly — lets tests substitute a fake that always/never reports.
#[async_trait]
pub trait SplitBrainSource: Send + Sync {
    /// Returns `Some(conflicting_leaders)` (length ≥ 2) iff split-brain is
    /// currently observed. Detection failures are the caller's concern: this
    /// port fails open (returns `Ok(None)`) on transient query errors, per
    /// the fail-open policy for detection in middleware contexts; the
    /// write-path guard wraps it with its own fail-closed handling (§7).
    async fn check(&self) -> Result<Option<Vec<String>>, LiteFsError>;
    async fn has_resolved(&self) -> bool;
}

/// A strategy a `ConflictResolution` port may apply once split-brain (or any
/// other conflict) has been detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Force the local node back to replica regardless of its belief.
    ForceReplica,
    /// Fence the marker file so no node can be mistaken for primary.
    FenceAll,
}

/// Defensive conflict resolution: fencing the marker file and applying an
/// explicit resolution strategy. Errors are logged by the caller and never
/// cascade — fencing is a best-effort safety net, not a correctness
/// mechanism in itself.
#[async_trait]
pub trait ConflictResolution: Send + Sync {
    async fn fence_write_access(&self) -> Result<(), LiteFsError>;
    async fn apply_resolution_strategy(&self, strategy: ResolutionStrategy)
    -> Result<(), LiteFsError>;
}

/// A minimal, framework-agnostic HTTP request the forwarding engine builds
/// from an inbound request plus the client's observed address.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The response the forwarding engine receives back from the primary, or
/// passes through verbatim to the original client.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A transport-level failure distinguishing "never got a response" from "got
/// one but it timed out mid-read", since only the former is eligible for the
/// retry-on-connect-failure branch of §4.8.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed before headers were received: {0}")]
    ConnectFailed(String),
    #[error("read timed out waiting for the primary")]
    ReadTimeout,
}

/// The HTTP client port the Forwarding Engine (C8) issues outbound requests
/// through. Transport errors surface to the caller for retry/breaker
/// handling; they are never converted to HTTP responses inside the port
/// itself.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn forward(
        &self,
        target_base: &str,
        request: OutboundRequest,
        connect_timeout: std::time::Duration,
        read_timeout: std::time::Duration,
    ) -> Result<InboundResponse, TransportError>;
}

/// The database-driver-agnostic executor the Write-Path Guard (C7) wraps.
/// Gives the guard no compile-time dependency on any particular SQLite
/// binding; test doubles record whether execution was ever reached.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(
        &self,
        sql: &str,
        params: &HashMap<String, String>,
    ) -> Result<u64, LiteFsError>;
    async fn execute_script(&self, script: &str) -> Result<(), LiteFsError>;
}
