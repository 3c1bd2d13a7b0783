//! Chain configuration
//!
//! Loaded from TOML. The granted policy has no default and must be spelled
//! out in every configuration.
//!
//! ```toml
//! hops = 3
//! principal_kind = "user"
//! credentials = { mode = "permanent" }
//! policy = { type = "managed", arn = "arn:aws:iam::aws:policy/ReadOnlyAccess" }
//!
//! [activation]
//! max_attempts = 6
//! delay_secs = 10
//! ```

use crate::activation::{ActivationChecker, ActivationConfig};
use crate::backend::IdentityBackend;
use crate::dispatcher::ReadinessConfig;
use crate::error::ChainError;
use crate::hop::ChainHop;
use crate::provisioner::IdentityProvisioner;
use crate::types::{CredentialRequest, PolicyGrant, PrincipalKind, UnitPayload, UnitSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Chain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Hops to run
    pub hops: u32,
    /// Principal name prefix
    #[serde(default = "default_prefix")]
    pub principal_prefix: String,
    /// Kind of principal minted per hop
    #[serde(default)]
    pub principal_kind: PrincipalKind,
    /// Credentials issued per hop
    #[serde(default)]
    pub credentials: CredentialRequest,
    /// Policy granted per hop
    pub policy: PolicyGrant,
    /// Activation checks
    #[serde(default)]
    pub activation: ActivationConfig,
    /// Remote execution; local hops when absent
    #[serde(default)]
    pub dispatch: Option<DispatchConfig>,
    /// Ledger output paths
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_prefix() -> String {
    "nested_user_".to_string()
}

impl ChainConfig {
    /// Create configuration granting `policy`
    #[must_use]
    pub fn new(hops: u32, policy: PolicyGrant) -> Self {
        Self {
            hops,
            principal_prefix: default_prefix(),
            principal_kind: PrincipalKind::default(),
            credentials: CredentialRequest::default(),
            policy,
            activation: ActivationConfig::default(),
            dispatch: None,
            output: OutputConfig::default(),
        }
    }

    /// Parse and validate TOML
    pub fn from_toml_str(input: &str) -> Result<Self, ChainError> {
        let config: Self =
            toml::from_str(input).map_err(|err| ChainError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|err| ChainError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&input)
    }

    /// With activation settings
    #[must_use]
    pub fn with_activation(mut self, activation: ActivationConfig) -> Self {
        self.activation = activation;
        self
    }

    /// With principal kind and credential request
    #[must_use]
    pub fn with_principals(mut self, kind: PrincipalKind, credentials: CredentialRequest) -> Self {
        self.principal_kind = kind;
        self.credentials = credentials;
        self
    }

    /// With remote dispatch
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.hops == 0 {
            return Err(ChainError::Config("hops must be at least 1".into()));
        }
        if self.principal_prefix.is_empty() {
            return Err(ChainError::Config("principal_prefix must not be empty".into()));
        }
        if self.policy.reference().is_empty() {
            return Err(ChainError::Config("policy must name a grant".into()));
        }
        if self.activation.max_attempts == 0 {
            return Err(ChainError::Config("activation.max_attempts must be at least 1".into()));
        }
        if let CredentialRequest::Session { duration_secs: 0 } = self.credentials {
            return Err(ChainError::Config("session duration must be positive".into()));
        }
        if let Some(dispatch) = &self.dispatch {
            dispatch.validate()?;
        }
        Ok(())
    }

    /// Build the hop body against an identity backend
    #[must_use]
    pub fn build_hop(&self, identity: Arc<dyn IdentityBackend>) -> ChainHop {
        let provisioner = IdentityProvisioner::new(Arc::clone(&identity), self.policy.clone())
            .with_prefix(self.principal_prefix.clone())
            .with_kind(self.principal_kind)
            .with_credentials(self.credentials);
        let checker = ActivationChecker::with_config(identity, self.activation);
        ChainHop::new(provisioner, checker)
    }
}

/// Unit placement strategy name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// One unit for every hop
    #[default]
    Shared,
    /// One unit per hop
    PerHop,
}

/// Remote dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Execution role name
    pub role_name: String,
    /// Policy for the execution role
    pub role_policy: PolicyGrant,
    /// Unit name prefix
    #[serde(default = "default_unit_prefix")]
    pub unit_prefix: String,
    /// Placement strategy
    #[serde(default)]
    pub placement: PlacementMode,
    /// Entry point inside the packaged artifact
    pub entry_point: String,
    /// Runtime identifier
    pub runtime: String,
    /// Per-invocation timeout
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Readiness polling
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Independent chains to run concurrently
    #[serde(default = "default_shards")]
    pub shards: usize,
}

fn default_unit_prefix() -> String {
    "hop-unit-".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_shards() -> usize {
    1
}

impl DispatchConfig {
    fn validate(&self) -> Result<(), ChainError> {
        if self.role_name.is_empty() {
            return Err(ChainError::Config("dispatch.role_name must not be empty".into()));
        }
        if self.readiness.max_polls == 0 {
            return Err(ChainError::Config("dispatch.readiness.max_polls must be at least 1".into()));
        }
        if self.shards == 0 {
            return Err(ChainError::Config("dispatch.shards must be at least 1".into()));
        }
        Ok(())
    }

    /// Unit spec for the packaged `artifact`
    #[must_use]
    pub fn unit_spec(&self, name: impl Into<String>, artifact: Vec<u8>) -> UnitSpec {
        UnitSpec {
            name: name.into(),
            payload: UnitPayload {
                entry_point: self.entry_point.clone(),
                runtime: self.runtime.clone(),
                artifact,
            },
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Ledger output paths
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Structured teardown record
    pub teardown_path: PathBuf,
    /// Flat audit text
    pub audit_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            teardown_path: PathBuf::from("generated_resources.json"),
            audit_path: PathBuf::from("credentials.txt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
hops = 3
policy = { type = "managed", arn = "arn:aws:iam::aws:policy/ReadOnlyAccess" }
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = ChainConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.hops, 3);
        assert_eq!(config.principal_prefix, "nested_user_");
        assert_eq!(config.activation, ActivationConfig::default());
        assert_eq!(config.credentials, CredentialRequest::Permanent);
        assert!(config.dispatch.is_none());
    }

    #[test]
    fn policy_is_required() {
        let err = ChainConfig::from_toml_str("hops = 2\n").unwrap_err();
        assert!(matches!(err, ChainError::Config(_)));
    }

    #[test]
    fn zero_hops_rejected() {
        let input = MINIMAL.replace("hops = 3", "hops = 0");
        assert!(ChainConfig::from_toml_str(&input).is_err());
    }

    #[test]
    fn session_roles_with_dispatch() {
        let input = r#"
hops = 4
principal_kind = "role"
credentials = { mode = "session", duration_secs = 3600 }
policy = { type = "inline", name = "scoped", document = { Version = "2012-10-17" } }

[dispatch]
role_name = "HopExecutionRole"
role_policy = { type = "managed", arn = "arn:aws:iam::aws:policy/service-role/BasicExecution" }
placement = "per_hop"
entry_point = "handler.serve_hop"
runtime = "provided.al2023"

[dispatch.readiness]
max_polls = 5
"#;
        let config = ChainConfig::from_toml_str(input).unwrap();
        assert_eq!(config.principal_kind, PrincipalKind::Role);
        assert_eq!(
            config.credentials,
            CredentialRequest::Session { duration_secs: 3600 }
        );
        let dispatch = config.dispatch.unwrap();
        assert_eq!(dispatch.placement, PlacementMode::PerHop);
        assert_eq!(dispatch.readiness.max_polls, 5);
        assert_eq!(dispatch.readiness.poll_interval_secs, 10);
        assert_eq!(dispatch.shards, 1);
        assert_eq!(dispatch.unit_spec("u1", vec![1, 2]).timeout_secs, 60);
    }

    #[test]
    fn zero_readiness_polls_rejected() {
        let input = format!(
            "{MINIMAL}\n[dispatch]\nrole_name = \"r\"\nrole_policy = {{ type = \"managed\", arn = \"a\" }}\nentry_point = \"e\"\nruntime = \"x\"\n[dispatch.readiness]\nmax_polls = 0\n"
        );
        assert!(matches!(
            ChainConfig::from_toml_str(&input),
            Err(ChainError::Config(_))
        ));
    }
}
