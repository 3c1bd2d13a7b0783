//! Core types for Hopchain
//!
//! Defines the data model shared by every component:
//! - Credential pairs (permanent or session-scoped)
//! - Principals and the policy granted to them
//! - Chain state and status
//! - Work units and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Credential pair issued to a principal
///
/// Either permanent (no expiry) or session-scoped (token + expiry).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    /// Public identifier (access key id)
    pub access_key_id: String,
    /// Secret half
    pub secret_access_key: String,
    /// Session token for session-scoped pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Expiry for session-scoped pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialPair {
    /// Create a permanent pair
    #[inline]
    #[must_use]
    pub fn permanent(access_key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret.into(),
            session_token: None,
            expires_at: None,
        }
    }

    /// Create a session-scoped pair
    #[inline]
    #[must_use]
    pub fn session(
        access_key_id: impl Into<String>,
        secret: impl Into<String>,
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret.into(),
            session_token: Some(token.into()),
            expires_at: Some(expires_at),
        }
    }

    /// Check if the pair carries an expiry
    #[inline]
    #[must_use]
    pub fn is_session_scoped(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Check expiry against `now`; permanent pairs never expire
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Reject the pair if it has expired
    pub fn ensure_usable(&self) -> Result<(), crate::error::ChainError> {
        if self.is_expired_at(Utc::now()) {
            return Err(crate::error::ChainError::CredentialExpired {
                credential_id: self.access_key_id.clone(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// What kind of credentials to issue for a new principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CredentialRequest {
    /// Long-lived access key
    #[default]
    Permanent,
    /// Temporary credentials valid for `duration_secs`
    Session { duration_secs: u64 },
}

/// Kind of identity minted per hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// Named user holding access keys
    #[default]
    User,
    /// Assumable role handing out session credentials
    Role,
}

impl std::fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Role => f.write_str("role"),
        }
    }
}

/// Policy granted to each new principal
///
/// Always an explicit input; there is no implied default grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PolicyGrant {
    /// Attach a managed policy by reference
    Managed { arn: String },
    /// Put an inline policy document
    Inline {
        name: String,
        document: serde_json::Value,
    },
}

impl PolicyGrant {
    /// Managed policy by reference
    #[inline]
    #[must_use]
    pub fn managed(arn: impl Into<String>) -> Self {
        Self::Managed { arn: arn.into() }
    }

    /// Identifier used in ledger records and teardown plans
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Managed { arn } => arn,
            Self::Inline { name, .. } => name,
        }
    }
}

/// Identity created by the provisioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Name, unique within the identity namespace
    pub name: String,
    /// User or role
    pub kind: PrincipalKind,
    /// Policies attached so far
    pub attached_policies: Vec<String>,
    /// Identifier of the owning credential pair
    pub credential_id: Option<String>,
}

/// Timestamp-derived principal name generator
///
/// Suffixes are unix seconds, bumped past the previous suffix when two
/// names are requested within the same second.
#[derive(Debug)]
pub struct PrincipalNamer {
    prefix: String,
    last: AtomicI64,
}

impl PrincipalNamer {
    /// Create namer with prefix
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last: AtomicI64::new(i64::MIN),
        }
    }

    /// Next name for the current wall clock
    #[must_use]
    pub fn next_name(&self) -> String {
        self.next_at(Utc::now().timestamp())
    }

    /// Next name for a given unix timestamp
    #[must_use]
    pub fn next_at(&self, unix_secs: i64) -> String {
        let mut suffix = unix_secs;
        let _ = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                suffix = unix_secs.max(last.saturating_add(1));
                Some(suffix)
            });
        format!("{}{}", self.prefix, suffix)
    }

    /// Name prefix
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for PrincipalNamer {
    fn default() -> Self {
        Self::new("nested_user_")
    }
}

/// Chain lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// Hops still pending
    Running,
    /// All hops completed
    Succeeded,
    /// A hop failed; no further hops run
    HaltedOnFailure,
}

impl ChainStatus {
    /// Check if no further transitions are possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Escalation chain state, mutated only by the driver
#[derive(Debug, Clone)]
pub struct ChainState {
    /// Credentials the next hop will use as parent
    pub current: CredentialPair,
    /// Hops completed and confirmed active
    pub completed_hops: u32,
    /// Requested hop count
    pub target_hops: u32,
    /// Lifecycle status
    pub status: ChainStatus,
}

impl ChainState {
    /// Fresh state from seed credentials
    #[inline]
    #[must_use]
    pub fn new(seed: CredentialPair, target_hops: u32) -> Self {
        Self {
            current: seed,
            completed_hops: 0,
            target_hops,
            status: if target_hops == 0 {
                ChainStatus::Succeeded
            } else {
                ChainStatus::Running
            },
        }
    }

    /// Number of the hop that runs next (1-based)
    #[inline]
    #[must_use]
    pub fn next_hop(&self) -> u32 {
        self.completed_hops + 1
    }
}

/// Work-unit lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Submitted, not yet ready
    Deploying,
    /// Ready for invocation
    Active,
    /// Deployment or activation failed
    Failed,
}

/// Packaged hop executor payload
#[derive(Clone, PartialEq, Eq)]
pub struct UnitPayload {
    /// Entry point the backend calls, e.g. `handler.serve_hop`
    pub entry_point: String,
    /// Runtime identifier understood by the execution backend
    pub runtime: String,
    /// Opaque packaged artifact
    pub artifact: Vec<u8>,
}

impl std::fmt::Debug for UnitPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitPayload")
            .field("entry_point", &self.entry_point)
            .field("runtime", &self.runtime)
            .field("artifact_len", &self.artifact.len())
            .finish()
    }
}

/// Deployment request for a work unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    /// Unit name
    pub name: String,
    /// Packaged payload
    pub payload: UnitPayload,
    /// Per-invocation timeout
    pub timeout_secs: u64,
}

impl UnitSpec {
    /// Create unit spec
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, payload: UnitPayload) -> Self {
        Self {
            name: name.into(),
            payload,
            timeout_secs: 60,
        }
    }

    /// Same payload under another name
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Execution role work units run under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRole {
    /// Role name
    pub name: String,
    /// Backend identifier (ARN or equivalent)
    pub id: String,
}

/// Deployed remote hop executor
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Unit name
    pub name: String,
    /// Packaged payload
    pub payload: UnitPayload,
    /// Role binding
    pub role: ExecutionRole,
    /// Lifecycle state
    pub state: UnitState,
}

impl WorkUnit {
    /// Check if the unit accepts invocations
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == UnitState::Active
    }
}
