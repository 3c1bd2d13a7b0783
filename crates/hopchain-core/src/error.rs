//! Error types for Hopchain Core
//!
//! Two layers:
//! - `BackendError`: what an identity or execution backend reports
//! - `ChainError`: what the chain components surface, always carrying
//!   enough context (principal, hop, unit) to resume or audit by hand

/// Failure reported by an external backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Entity with that name already exists
    #[error("entity already exists: {0}")]
    AlreadyExists(String),

    /// Caller lacks the rights for the operation
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Entity does not exist
    #[error("entity not found: {0}")]
    NotFound(String),

    /// Backend refused the call due to rate limiting
    #[error("request throttled")]
    Throttled,

    /// Any other service-side failure
    #[error("service error: {0}")]
    Service(String),
}

impl BackendError {
    /// Check if this is the distinguishable "already exists" condition
    #[inline]
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Check if this is an authorization failure
    #[inline]
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

/// Main chain error type
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Principal name collision, recovered locally by the provisioner
    #[error("principal {principal} already exists (hop {hop})")]
    AlreadyExists { principal: String, hop: u32 },

    /// Parent credentials may not provision or attach
    #[error("authorization failed for {operation} on {principal} at hop {hop}: {reason}")]
    Authorization {
        principal: String,
        hop: u32,
        operation: Operation,
        reason: String,
    },

    /// Credentials never became usable
    #[error("credentials for {principal} not active after {attempts} attempts at hop {hop}")]
    ActivationTimeout {
        principal: String,
        hop: u32,
        attempts: u32,
    },

    /// Remote work unit returned malformed or error output
    #[error("invocation of unit {unit} failed at hop {hop}: {reason}")]
    Invocation {
        unit: String,
        hop: u32,
        /// Principal the unit reported creating, if any
        principal: Option<String>,
        reason: String,
    },

    /// Work unit never reported readiness
    #[error("unit {unit} not active after {attempts} readiness polls")]
    DeploymentStall { unit: String, attempts: u32 },

    /// Backend refused the deployment or the unit entered the failed state
    #[error("deployment of unit {unit} failed: {reason}")]
    Deployment { unit: String, reason: String },

    /// Any other backend failure while provisioning
    #[error("{operation} failed for {principal} at hop {hop}: {source}")]
    Provisioning {
        principal: String,
        hop: u32,
        operation: Operation,
        #[source]
        source: BackendError,
    },

    /// Session-scoped pair offered after its expiry
    #[error("credential {credential_id} expired")]
    CredentialExpired { credential_id: String },

    /// Ledger rejected an append or could not be persisted
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Hop number the error belongs to, if hop-scoped
    #[must_use]
    pub fn hop(&self) -> Option<u32> {
        match self {
            Self::AlreadyExists { hop, .. }
            | Self::Authorization { hop, .. }
            | Self::ActivationTimeout { hop, .. }
            | Self::Invocation { hop, .. }
            | Self::Provisioning { hop, .. } => Some(*hop),
            _ => None,
        }
    }

    /// Principal name the error refers to, if known
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::AlreadyExists { principal, .. }
            | Self::Authorization { principal, .. }
            | Self::ActivationTimeout { principal, .. }
            | Self::Provisioning { principal, .. } => Some(principal),
            Self::Invocation { principal, .. } => principal.as_deref(),
            _ => None,
        }
    }

    /// Check if the condition is recovered locally instead of halting
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Build a provisioning error, promoting access denial to `Authorization`
    pub(crate) fn from_backend(
        principal: &str,
        hop: u32,
        operation: Operation,
        source: BackendError,
    ) -> Self {
        match source {
            BackendError::AccessDenied(reason) => Self::Authorization {
                principal: principal.to_string(),
                hop,
                operation,
                reason,
            },
            BackendError::AlreadyExists(_) => Self::AlreadyExists {
                principal: principal.to_string(),
                hop,
            },
            source => Self::Provisioning {
                principal: principal.to_string(),
                hop,
                operation,
                source,
            },
        }
    }
}

/// Backend operation a provisioning error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreatePrincipal,
    IssueCredentials,
    AttachPolicy,
    CreateRole,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreatePrincipal => "create principal",
            Self::IssueCredentials => "issue credentials",
            Self::AttachPolicy => "attach policy",
            Self::CreateRole => "create role",
        };
        f.write_str(name)
    }
}

/// Resource ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Same resource recorded twice
    #[error("{kind} {name} already recorded")]
    Duplicate { kind: &'static str, name: String },

    /// Persisting the ledger failed
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding the teardown record failed
    #[error("ledger encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}
