// src/core/forwarding/engine.rs

//! Forwarding Engine (C8): transparently redirects mutating requests from a
//! replica to the primary, with retry, circuit-breaking, and path-based
//! exclusions.

use crate::config::{ForwardingConfig, ForwardingScheme};
use crate::core::errors::LiteFsError;
use crate::core::forwarding::circuit::CircuitBreaker;
use crate::core::forwarding::exclusion::ExclusionMatcher;
use crate::core::mount::MountObserver;
use crate::core::role::RoleResolver;
use crate::ports::{HttpClient, InboundResponse, OutboundRequest, SplitBrainSource, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const IDEMPOTENCY_KEY_HEADER: &str = "X-Idempotency-Key";
const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
const FORWARDED_HOST_HEADER: &str = "X-Forwarded-Host";
const FORWARDED_PROTO_HEADER: &str = "X-Forwarded-Proto";
const HOST_HEADER: &str = "Host";

/// Safe HTTP methods that are always passed through, never forwarded.
const SAFE_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS"];

/// Status codes eligible for retry, per §4.8.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}

/// A framework-agnostic view of the inbound request the embedding
/// application hands the engine.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub path_and_query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub client_addr: String,
    pub host: String,
    pub scheme: String,
}

/// What the embedding application should do with the inbound request.
#[derive(Debug, Clone)]
pub enum ForwardDecision {
    PassThrough,
    Forwarded(InboundResponse),
}

pub struct ForwardingEngine {
    config: ForwardingConfig,
    mount: Arc<MountObserver>,
    role: Arc<RoleResolver>,
    http: Arc<dyn HttpClient>,
    breaker: CircuitBreaker,
    exclusions: ExclusionMatcher,
    split_brain: Option<Arc<dyn SplitBrainSource>>,
}

impl ForwardingEngine {
    pub fn new(
        config: ForwardingConfig,
        mount: Arc<MountObserver>,
        role: Arc<RoleResolver>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, LiteFsError> {
        Self::build(config, mount, role, http, None)
    }

    /// Wires a split-brain detector ahead of forwarding (§4.8 "Middleware
    /// ordering"): every request is blocked with `503` + `Retry-After: 30`
    /// while split-brain is observed, before a primary is even resolved.
    pub fn with_split_brain_detector(
        config: ForwardingConfig,
        mount: Arc<MountObserver>,
        role: Arc<RoleResolver>,
        http: Arc<dyn HttpClient>,
        detector: Arc<dyn SplitBrainSource>,
    ) -> Result<Self, LiteFsError> {
        Self::build(config, mount, role, http, Some(detector))
    }

    fn build(
        config: ForwardingConfig,
        mount: Arc<MountObserver>,
        role: Arc<RoleResolver>,
        http: Arc<dyn HttpClient>,
        split_brain: Option<Arc<dyn SplitBrainSource>>,
    ) -> Result<Self, LiteFsError> {
        let exclusions = ExclusionMatcher::new(
            config.excluded_exact.clone(),
            &config.excluded_glob,
            &config.excluded_regex,
        )?;
        let breaker = CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_reset_timeout);
        Ok(Self {
            config,
            mount,
            role,
            http,
            breaker,
            exclusions,
            split_brain,
        })
    }

    fn should_pass_through(&self, req: &InboundRequest, is_primary: bool) -> bool {
        !self.config.enabled
            || is_primary
            || SAFE_METHODS.contains(&req.method.to_ascii_uppercase().as_str())
            || self.exclusions.matches(path_only(&req.path_and_query))
    }

    /// Decides whether to forward `req` and, if so, carries the forward out.
    pub async fn handle(&self, req: InboundRequest) -> ForwardDecision {
        if let Some(blocked) = self.check_split_brain().await {
            return blocked;
        }

        let is_primary = self.role.is_primary().await;
        if self.should_pass_through(&req, is_primary) {
            return ForwardDecision::PassThrough;
        }

        let primary_url = match self.resolve_primary_url().await {
            Some(url) => url,
            None => {
                return ForwardDecision::Forwarded(InboundResponse {
                    status: 503,
                    headers: Vec::new(),
                    body: b"primary node unknown".to_vec(),
                });
            }
        };

        if let Err(open) = self.breaker.try_acquire() {
            let err = LiteFsError::BreakerOpen {
                retry_after_secs: open.retry_after_secs,
            };
            warn!(error = %err, "forwarding rejected before dialing out");
            return ForwardDecision::Forwarded(InboundResponse {
                status: 503,
                headers: vec![("Retry-After".to_string(), open.retry_after_secs.to_string())],
                body: Vec::new(),
            });
        }

        let target_base = format!("{}://{}", self.config.scheme.as_str(), primary_url);
        let outbound = self.build_outbound_request(&req, &primary_url);
        let response = self.forward_with_retry(&target_base, outbound).await;

        match response {
            Ok(mut resp) => {
                resp.headers.push(("X-LiteFS-Forwarded".to_string(), "true".to_string()));
                resp.headers
                    .push(("X-LiteFS-Primary-Node".to_string(), primary_url));
                ForwardDecision::Forwarded(resp)
            }
            Err(FinalFailure::Timeout) => ForwardDecision::Forwarded(InboundResponse {
                status: 504,
                headers: vec![("X-LiteFS-Forwarding-Error".to_string(), "timeout".to_string())],
                body: Vec::new(),
            }),
            Err(FinalFailure::Upstream) => ForwardDecision::Forwarded(InboundResponse {
                status: 502,
                headers: vec![("X-LiteFS-Forwarding-Error".to_string(), "upstream".to_string())],
                body: Vec::new(),
            }),
        }
    }

    /// Split-brain middleware (§4.8 "Middleware ordering"): runs before any
    /// role check or primary resolution, and blocks every request — not just
    /// writes — while split-brain is observed. Detector errors fail open, per
    /// the `SplitBrainSource` port's documented policy.
    async fn check_split_brain(&self) -> Option<ForwardDecision> {
        let detector = self.split_brain.as_ref()?;
        match detector.check().await {
            Ok(Some(leaders)) => {
                let err = LiteFsError::SplitBrain {
                    leader_count: leaders.len(),
                };
                warn!(error = %err, "blocking request: split-brain observed");
                Some(ForwardDecision::Forwarded(InboundResponse {
                    status: 503,
                    headers: vec![("Retry-After".to_string(), "30".to_string())],
                    body: Vec::new(),
                }))
            }
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "split-brain detector query failed ahead of forwarding; allowing");
                None
            }
        }
    }

    async fn resolve_primary_url(&self) -> Option<String> {
        match self.mount.read_primary_marker().await {
            Ok(marker) => marker
                .primary_url()
                .map(str::to_string)
                .or_else(|| self.config.primary_hint.clone()),
            Err(e) => {
                debug!(error = %e, "could not read primary marker while forwarding");
                self.config.primary_hint.clone()
            }
        }
    }

    /// Builds the outbound request from `req`, rewriting `Host` to
    /// `primary_authority` and propagating the `X-Forwarded-*` headers
    /// (§4.8 "Request preservation").
    fn build_outbound_request(&self, req: &InboundRequest, primary_authority: &str) -> OutboundRequest {
        let mut headers: Vec<(String, String)> = req
            .headers
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(HOST_HEADER))
            .cloned()
            .collect();

        headers.push((HOST_HEADER.to_string(), primary_authority.to_string()));

        if let Some((_, existing)) = headers
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(FORWARDED_FOR_HEADER))
        {
            existing.push_str(", ");
            existing.push_str(&req.client_addr);
        } else {
            headers.push((FORWARDED_FOR_HEADER.to_string(), req.client_addr.clone()));
        }

        headers.push((FORWARDED_HOST_HEADER.to_string(), req.host.clone()));
        headers.push((FORWARDED_PROTO_HEADER.to_string(), req.scheme.clone()));

        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(IDEMPOTENCY_KEY_HEADER))
        {
            headers.push((IDEMPOTENCY_KEY_HEADER.to_string(), Uuid::new_v4().to_string()));
        }

        OutboundRequest {
            method: req.method.clone(),
            path_and_query: req.path_and_query.clone(),
            headers,
            body: req.body.clone(),
        }
    }

    /// Issues the forward, retrying on connect failure or a {502,503,504}
    /// response, with exponential backoff. The idempotency key (already
    /// baked into `request.headers` before this call) stays fixed across
    /// every attempt.
    async fn forward_with_retry(
        &self,
        target_base: &str,
        request: OutboundRequest,
    ) -> Result<InboundResponse, FinalFailure> {
        let max_attempts = self.config.retry_count + 1;

        for attempt in 1..=max_attempts {
            let outcome = self
                .http
                .forward(
                    target_base,
                    request.clone(),
                    self.config.connect_timeout,
                    self.config.read_timeout,
                )
                .await;

            match outcome {
                Ok(response) => {
                    if is_retryable_status(response.status) {
                        if attempt < max_attempts {
                            self.sleep_backoff(attempt).await;
                            continue;
                        }
                        self.breaker.record_failure();
                        let err = LiteFsError::Transport(Box::from(format!(
                            "primary returned retryable status {} after {attempt} attempts",
                            response.status
                        )));
                        warn!(error = %err, "forward attempts exhausted");
                        return Err(FinalFailure::Upstream);
                    }
                    self.breaker.record_success();
                    return Ok(response);
                }
                Err(TransportError::ReadTimeout) => {
                    self.breaker.record_failure();
                    let err = LiteFsError::Timeout;
                    warn!(attempt, error = %err, "forward attempt timed out");
                    return Err(FinalFailure::Timeout);
                }
                Err(TransportError::ConnectFailed(msg)) => {
                    warn!(attempt, error = %msg, "forward attempt failed to connect");
                    if attempt < max_attempts {
                        self.sleep_backoff(attempt).await;
                        continue;
                    }
                }
            }
        }

        self.breaker.record_failure();
        let err = LiteFsError::Transport(Box::from(format!(
            "failed to connect to primary after {max_attempts} attempts"
        )));
        warn!(error = %err, "forward attempts exhausted");
        Err(FinalFailure::Upstream)
    }

    async fn sleep_backoff(&self, attempt: u32) {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.config.retry_backoff_base * factor;
        tokio::time::sleep(delay).await;
    }
}

enum FinalFailure {
    Timeout,
    Upstream,
}

fn path_only(path_and_query: &str) -> &str {
    path_and_query.split('?').next().unwrap_or(path_and_query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn config() -> ForwardingConfig {
        ForwardingConfig {
            enabled: true,
            connect_timeout: Duration::from_millis(50),
            read_timeout: Duration::from_millis(50),
            retry_count: 2,
            retry_backoff_base: Duration::from_millis(1),
            circuit_breaker_threshold: 5,
            circuit_reset_timeout: Duration::from_secs(30),
            excluded_exact: HashSet::new(),
            excluded_glob: Vec::new(),
            excluded_regex: Vec::new(),
            scheme: ForwardingScheme::Http,
            primary_hint: None,
        }
    }

    fn replica_setup() -> (TempDir, Arc<MountObserver>, Arc<RoleResolver>) {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let role = Arc::new(RoleResolver::new_static(mount.clone(), "node1", "node2"));
        (dir, mount, role)
    }

    fn req(method: &str, path: &str) -> InboundRequest {
        InboundRequest {
            method: method.to_string(),
            path_and_query: path.to_string(),
            headers: vec![("Authorization".to_string(), "Bearer z".to_string())],
            body: b"{\"v\":1}".to_vec(),
            client_addr: "198.51.100.7".to_string(),
            host: "replica.local".to_string(),
            scheme: "https".to_string(),
        }
    }

    struct ScriptedHttp {
        responses: std::sync::Mutex<Vec<Result<InboundResponse, TransportError>>>,
        calls: AtomicUsize,
        last_request: std::sync::Mutex<Option<OutboundRequest>>,
    }

    impl ScriptedHttp {
        fn new(responses: Vec<Result<InboundResponse, TransportError>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses),
                calls: AtomicUsize::new(0),
                last_request: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn forward(
            &self,
            _target_base: &str,
            request: OutboundRequest,
            _connect_timeout: Duration,
            _read_timeout: Duration,
        ) -> Result<InboundResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request);
            self.responses.lock().unwrap().remove(0)
        }
    }

    struct AlwaysSplitBrain;

    #[async_trait]
    impl SplitBrainSource for AlwaysSplitBrain {
        async fn check(&self) -> Result<Option<Vec<String>>, LiteFsError> {
            Ok(Some(vec!["node1".to_string(), "node2".to_string()]))
        }
        async fn has_resolved(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn s3_forward_post_from_replica_to_primary() {
        let (_dir, mount, role) = replica_setup();
        tokio::fs::write(mount.mount_path().join(".primary"), b"primary.local:8000")
            .await
            .unwrap();
        let http = Arc::new(ScriptedHttp::new(vec![Ok(InboundResponse {
            status: 201,
            headers: vec![("X-Custom".to_string(), "k".to_string())],
            body: b"{\"v\":1}".to_vec(),
        })]));
        let engine = ForwardingEngine::new(config(), mount, role, http.clone()).unwrap();
        let decision = engine.handle(req("POST", "/api/x")).await;
        match decision {
            ForwardDecision::Forwarded(resp) => {
                assert_eq!(resp.status, 201);
                assert!(resp.headers.iter().any(|(k, v)| k == "X-Custom" && v == "k"));
                assert!(resp.headers.iter().any(|(k, _)| k == "X-LiteFS-Forwarded"));
            }
            other => panic!("expected forwarded response, got {other:?}"),
        }
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);

        let sent = http.last_request.lock().unwrap().clone().unwrap();
        assert!(
            sent.headers
                .iter()
                .any(|(k, v)| k == "Host" && v == "primary.local:8000")
        );
        assert!(
            sent.headers
                .iter()
                .any(|(k, v)| k == "X-Forwarded-For" && v.contains("198.51.100.7"))
        );
        assert!(
            sent.headers
                .iter()
                .any(|(k, v)| k == "Authorization" && v == "Bearer z")
        );
    }

    #[tokio::test]
    async fn s4_retry_then_succeed_on_503() {
        let (_dir, mount, role) = replica_setup();
        tokio::fs::write(mount.mount_path().join(".primary"), b"primary.local:8000")
            .await
            .unwrap();
        let http = Arc::new(ScriptedHttp::new(vec![
            Ok(InboundResponse {
                status: 503,
                headers: vec![],
                body: vec![],
            }),
            Ok(InboundResponse {
                status: 503,
                headers: vec![],
                body: vec![],
            }),
            Ok(InboundResponse {
                status: 201,
                headers: vec![],
                body: vec![],
            }),
        ]));
        let engine = ForwardingEngine::new(config(), mount, role, http.clone()).unwrap();
        let decision = engine.handle(req("POST", "/api/x")).await;
        assert!(matches!(decision, ForwardDecision::Forwarded(resp) if resp.status == 201));
        assert_eq!(http.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn s5_circuit_opens_after_threshold() {
        let (_dir, mount, role) = replica_setup();
        tokio::fs::write(mount.mount_path().join(".primary"), b"primary.local:8000")
            .await
            .unwrap();
        let mut cfg = config();
        cfg.retry_count = 0;
        cfg.circuit_breaker_threshold = 5;
        let responses: Vec<_> = (0..5)
            .map(|_| Err(TransportError::ConnectFailed("refused".to_string())))
            .collect();
        let http = Arc::new(ScriptedHttp::new(responses));
        let engine = ForwardingEngine::new(cfg, mount, role, http.clone()).unwrap();
        for _ in 0..5 {
            engine.handle(req("POST", "/api/x")).await;
        }
        let sixth = engine.handle(req("POST", "/api/x")).await;
        match sixth {
            ForwardDecision::Forwarded(resp) => {
                assert_eq!(resp.status, 503);
                assert!(resp.headers.iter().any(|(k, _)| k == "Retry-After"));
            }
            other => panic!("expected breaker-open response, got {other:?}"),
        }
        assert_eq!(http.calls.load(Ordering::SeqCst), 5, "sixth request must not attempt");
    }

    #[tokio::test]
    async fn primary_node_passes_through() {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let role = Arc::new(RoleResolver::new_static(mount.clone(), "node1", "node1"));
        let http = Arc::new(ScriptedHttp::new(vec![]));
        let engine = ForwardingEngine::new(config(), mount, role, http).unwrap();
        let decision = engine.handle(req("POST", "/api/x")).await;
        assert!(matches!(decision, ForwardDecision::PassThrough));
    }

    #[tokio::test]
    async fn get_request_passes_through() {
        let (_dir, mount, role) = replica_setup();
        let http = Arc::new(ScriptedHttp::new(vec![]));
        let engine = ForwardingEngine::new(config(), mount, role, http).unwrap();
        let decision = engine.handle(req("GET", "/api/x")).await;
        assert!(matches!(decision, ForwardDecision::PassThrough));
    }

    #[tokio::test]
    async fn unknown_primary_yields_503() {
        let (_dir, mount, role) = replica_setup();
        let http = Arc::new(ScriptedHttp::new(vec![]));
        let engine = ForwardingEngine::new(config(), mount, role, http).unwrap();
        let decision = engine.handle(req("POST", "/api/x")).await;
        assert!(matches!(decision, ForwardDecision::Forwarded(resp) if resp.status == 503));
    }

    #[tokio::test]
    async fn split_brain_blocks_even_a_get_on_a_primary() {
        let dir = TempDir::new().unwrap();
        let mount = Arc::new(MountObserver::new(dir.path()));
        let role = Arc::new(RoleResolver::new_static(mount.clone(), "node1", "node1"));
        let http = Arc::new(ScriptedHttp::new(vec![]));
        let engine = ForwardingEngine::with_split_brain_detector(
            config(),
            mount,
            role,
            http.clone(),
            Arc::new(AlwaysSplitBrain),
        )
        .unwrap();
        let decision = engine.handle(req("GET", "/api/x")).await;
        match decision {
            ForwardDecision::Forwarded(resp) => {
                assert_eq!(resp.status, 503);
                assert!(resp.headers.iter().any(|(k, v)| k == "Retry-After" && v == "30"));
            }
            other => panic!("expected split-brain block, got {other:?}"),
        }
        assert_eq!(http.calls.load(Ordering::SeqCst), 0, "no outbound attempt during split-brain");
    }
}
