// src/adapters.rs

//! Default production-grade port adapters (§6 "Default port adapters").
//! Everything else — a real Raft leader-election client, node-id resolution
//! — is left to the embedding application; the core only defines and
//! consumes the port traits.

use crate::core::errors::LiteFsError;
use crate::core::mount::MountObserver;
use crate::ports::{
    ConflictResolution, HttpClient, InboundResponse, NodeIdResolver, OutboundRequest,
    ResolutionStrategy, TransportError,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// `reqwest`-backed implementation of the HTTP Client port. `reqwest` does not
/// expose a distinct per-request connect timeout, so `connect_timeout +
/// read_timeout` bounds the whole request; a connect-phase failure and a
/// read-phase timeout still surface as the distinct `TransportError`
/// variants the forwarding engine's retry policy depends on.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn forward(
        &self,
        target_base: &str,
        request: OutboundRequest,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<InboundResponse, TransportError> {
        let url = format!("{target_base}{}", request.path_and_query);
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let mut builder = self
            .client
            .request(method, &url)
            .timeout(connect_timeout + read_timeout)
            .body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::ReadTimeout
            } else {
                TransportError::ConnectFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|_| TransportError::ReadTimeout)?
            .to_vec();

        Ok(InboundResponse { status, headers, body })
    }
}

/// Conflict resolution backed by the mount's marker-file fencing (§6
/// "Marker-file protocol"). `ForceReplica` is a role-level concern the
/// Failover Coordinator itself owns; this adapter only fences the marker,
/// which is always safe regardless of strategy.
pub struct MountFencing {
    mount: Arc<MountObserver>,
}

impl MountFencing {
    pub fn new(mount: Arc<MountObserver>) -> Self {
        Self { mount }
    }
}

#[async_trait]
impl ConflictResolution for MountFencing {
    async fn fence_write_access(&self) -> Result<(), LiteFsError> {
        self.mount.fence().await
    }

    async fn apply_resolution_strategy(&self, strategy: ResolutionStrategy) -> Result<(), LiteFsError> {
        match strategy {
            ResolutionStrategy::FenceAll => self.mount.fence().await,
            ResolutionStrategy::ForceReplica => Ok(()),
        }
    }
}

/// Node-id resolution backed by a configured string, supplied by the
/// embedding application at startup (its own hostname, a pod name, whatever
/// the deployment considers stable). Validated once at construction so a
/// misconfigured empty id is caught before the raft split-brain path ever
/// needs it.
pub struct ConfiguredNodeIdResolver {
    node_id: String,
}

impl ConfiguredNodeIdResolver {
    pub fn new(node_id: impl Into<String>) -> Result<Self, LiteFsError> {
        let node_id = node_id.into();
        if node_id.trim().is_empty() {
            return Err(LiteFsError::configuration("node id must not be empty"));
        }
        Ok(Self { node_id })
    }
}

impl NodeIdResolver for ConfiguredNodeIdResolver {
    fn resolve_node_id(&self) -> Result<String, LiteFsError> {
        Ok(self.node_id.clone())
    }
}
