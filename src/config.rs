// src/config.rs

//! Loads and validates the cluster coordination settings.
//!
//! `RawClusterSettings` accepts whatever is written in the TOML file
//! (including combinations that are not valid together), and
//! `ClusterSettings::from_raw` is the single validating factory that turns
//! it into the immutable, process-wide settings object every component is
//! constructed with.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::errors::LiteFsError;

/// Which leader-election strategy resolves the primary role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderElectionMode {
    Static,
    Raft,
}

/// Scheme used when forwarding a request to the primary's proxy port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardingScheme {
    Http,
    Https,
}

impl ForwardingScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Raw, pre-validation view of the forwarding sub-settings (§3 "Forwarding
/// configuration"). Every field has a default so an operator can omit the
/// whole `[forwarding]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawForwardingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(with = "humantime_serde", default = "default_retry_backoff_base")]
    pub retry_backoff_base: Duration,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(with = "humantime_serde", default = "default_circuit_reset_timeout")]
    pub circuit_reset_timeout: Duration,
    #[serde(default)]
    pub excluded_exact: HashSet<String>,
    #[serde(default)]
    pub excluded_glob: Vec<String>,
    #[serde(default)]
    pub excluded_regex: Vec<String>,
    #[serde(default = "default_scheme")]
    pub scheme: ForwardingScheme,
    #[serde(default)]
    pub primary_hint: Option<String>,
}

impl Default for RawForwardingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            retry_count: default_retry_count(),
            retry_backoff_base: default_retry_backoff_base(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_reset_timeout: default_circuit_reset_timeout(),
            excluded_exact: HashSet::new(),
            excluded_glob: Vec::new(),
            excluded_regex: Vec::new(),
            scheme: default_scheme(),
            primary_hint: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(25)
}
fn default_retry_count() -> u32 {
    2
}
fn default_retry_backoff_base() -> Duration {
    Duration::from_millis(100)
}
fn default_circuit_breaker_threshold() -> u32 {
    5
}
fn default_circuit_reset_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_scheme() -> ForwardingScheme {
    ForwardingScheme::Http
}

/// The validated forwarding configuration (§4.8). Immutable after construction.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    pub enabled: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry_count: u32,
    pub retry_backoff_base: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_reset_timeout: Duration,
    pub excluded_exact: HashSet<String>,
    pub excluded_glob: Vec<String>,
    pub excluded_regex: Vec<String>,
    pub scheme: ForwardingScheme,
    pub primary_hint: Option<String>,
}

impl ForwardingConfig {
    fn from_raw(raw: RawForwardingConfig) -> std::result::Result<Self, LiteFsError> {
        // retry_count is unsigned at the type level already, so "≥ 0" always holds.
        Ok(Self {
            enabled: raw.enabled,
            connect_timeout: raw.connect_timeout,
            read_timeout: raw.read_timeout,
            retry_count: raw.retry_count,
            retry_backoff_base: raw.retry_backoff_base,
            circuit_breaker_threshold: raw.circuit_breaker_threshold,
            circuit_reset_timeout: raw.circuit_reset_timeout,
            excluded_exact: raw.excluded_exact,
            excluded_glob: raw.excluded_glob,
            excluded_regex: raw.excluded_regex,
            scheme: raw.scheme,
            primary_hint: raw.primary_hint,
        })
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self::from_raw(RawForwardingConfig::default()).expect("defaults are always valid")
    }
}

/// Raw, pre-validation view of the full cluster settings file. Accepts any
/// combination of fields as written; `leader_election` alone decides which of
/// `primary_hostname` / (`self_addr`, `peers`) are actually consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawClusterSettings {
    pub mount_path: String,
    pub data_path: String,
    pub database_name: String,
    pub leader_election: LeaderElectionMode,
    pub proxy_addr: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub primary_hostname: Option<String>,
    #[serde(default)]
    pub self_addr: Option<String>,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub forwarding: RawForwardingConfig,
}

/// The validated, immutable cluster settings object (§3). Constructed only
/// via `ClusterSettings::from_raw` / `ClusterSettings::from_file`; every
/// invariant in §3 is enforced before a value can exist.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub mount_path: String,
    pub data_path: String,
    pub database_name: String,
    pub leader_election: LeaderElectionSettings,
    pub proxy_addr: String,
    pub enabled: bool,
    pub forwarding: ForwardingConfig,
}

/// The resolved, mode-specific leader-election settings. Replaces a pair of
/// "optional depending on mode" fields with a sum type so callers can never
/// observe an inconsistent combination (e.g. `raft` mode with no peers).
#[derive(Debug, Clone)]
pub enum LeaderElectionSettings {
    Static { primary_hostname: String },
    Raft { self_addr: String, peers: Vec<String> },
}

impl LeaderElectionSettings {
    pub fn mode(&self) -> LeaderElectionMode {
        match self {
            Self::Static { .. } => LeaderElectionMode::Static,
            Self::Raft { .. } => LeaderElectionMode::Raft,
        }
    }
}

fn validate_absolute_no_dotdot(field: &str, value: &str) -> std::result::Result<(), LiteFsError> {
    let path = Path::new(value);
    if !path.is_absolute() {
        return Err(LiteFsError::configuration(format!(
            "{field} must be an absolute path, got '{value}'"
        )));
    }
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(LiteFsError::configuration(format!(
            "{field} must not contain '..' segments, got '{value}'"
        )));
    }
    Ok(())
}

impl ClusterSettings {
    /// The single validating factory. Invariants enforced here can never be
    /// bypassed by constructing the struct any other way (its fields are
    /// private-by-convention; callers outside this module only ever see
    /// values that already passed validation).
    pub fn from_raw(raw: RawClusterSettings) -> std::result::Result<Self, LiteFsError> {
        validate_absolute_no_dotdot("mount_path", &raw.mount_path)?;
        validate_absolute_no_dotdot("data_path", &raw.data_path)?;

        if raw.database_name.trim().is_empty() {
            return Err(LiteFsError::configuration(
                "database_name must not be empty or whitespace",
            ));
        }

        if raw.proxy_addr.trim().is_empty() {
            return Err(LiteFsError::configuration("proxy_addr must not be empty"));
        }

        let leader_election = match raw.leader_election {
            LeaderElectionMode::Static => {
                let primary_hostname = raw.primary_hostname.unwrap_or_default();
                if primary_hostname.trim().is_empty() {
                    return Err(LiteFsError::configuration(
                        "primary_hostname is required in static mode",
                    ));
                }
                // Raft fields are ignored in static mode, even if malformed.
                LeaderElectionSettings::Static { primary_hostname }
            }
            LeaderElectionMode::Raft => {
                let self_addr = raw.self_addr.unwrap_or_default();
                if self_addr.trim().is_empty() {
                    return Err(LiteFsError::configuration(
                        "self_addr is required in raft mode",
                    ));
                }
                if raw.peers.is_empty() {
                    return Err(LiteFsError::configuration(
                        "peers must not be empty in raft mode",
                    ));
                }
                LeaderElectionSettings::Raft {
                    self_addr,
                    peers: raw.peers,
                }
            }
        };

        Ok(Self {
            mount_path: raw.mount_path,
            data_path: raw.data_path,
            database_name: raw.database_name,
            leader_election,
            proxy_addr: raw.proxy_addr,
            enabled: raw.enabled,
            forwarding: ForwardingConfig::from_raw(raw.forwarding)?,
        })
    }

    /// Reads and parses a TOML file, then validates it.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster settings file at '{path}'"))?;
        let raw: RawClusterSettings = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;
        ClusterSettings::from_raw(raw).map_err(|e| anyhow!(e))
    }
}
