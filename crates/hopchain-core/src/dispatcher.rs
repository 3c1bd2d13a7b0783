//! Work-unit dispatcher
//!
//! Deploys hop executors to a remote execution backend, waits for them to
//! become active with a bounded poll, and invokes them with JSON
//! request/response. `RemoteHopExecutor` plugs a dispatcher into the chain
//! driver.

use crate::activation::ActivationConfig;
use crate::backend::ExecutionBackend;
use crate::error::{BackendError, ChainError, Operation};
use crate::hop::{status, HopExecutor, HopOutcome, HopRequest, HopResponse};
use crate::ledger::{PrincipalRecord, ResourceKind, ResourceLedger, RoleRecord, WorkUnitRecord};
use crate::poll::{poll_until, Check, PollOutcome, PollPolicy};
use crate::types::{
    CredentialPair, ExecutionRole, PolicyGrant, Principal, PrincipalKind, UnitSpec, UnitState,
    WorkUnit,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Readiness polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Seconds between readiness checks
    pub poll_interval_secs: u64,
    /// Checks before giving up with `DeploymentStall`
    pub max_polls: u32,
}

impl ReadinessConfig {
    fn policy(&self) -> PollPolicy {
        PollPolicy::new(self.max_polls, Duration::from_secs(self.poll_interval_secs))
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_polls: 30,
        }
    }
}

/// Work-unit dispatcher
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn ExecutionBackend>,
    authority: CredentialPair,
    readiness: ReadinessConfig,
}

impl Dispatcher {
    /// Create dispatcher acting with `authority` on the execution backend
    #[must_use]
    pub fn new(backend: Arc<dyn ExecutionBackend>, authority: CredentialPair) -> Self {
        Self {
            backend,
            authority,
            readiness: ReadinessConfig::default(),
        }
    }

    /// With readiness polling settings
    #[must_use]
    pub fn with_readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    /// Create (or reuse) the execution role units run under
    ///
    /// # Errors
    /// `ChainError::Authorization` or `ChainError::Provisioning` from the backend.
    pub async fn prepare_role(
        &self,
        role_name: &str,
        policy: &PolicyGrant,
        ledger: &mut ResourceLedger,
    ) -> Result<ExecutionRole, ChainError> {
        let created = self
            .backend
            .create_execution_role(&self.authority, role_name, policy)
            .await;

        let id = match created {
            Ok(id) => {
                tracing::info!(role = role_name, policy = policy.reference(), "execution role created");
                id
            }
            Err(err) if err.is_already_exists() => {
                tracing::warn!(role = role_name, "execution role already exists, reusing");
                self.backend
                    .get_execution_role(&self.authority, role_name)
                    .await
                    .map_err(|err| ChainError::from_backend(role_name, 0, Operation::CreateRole, err))?
            }
            Err(err) => return Err(ChainError::from_backend(role_name, 0, Operation::CreateRole, err)),
        };

        if !ledger.contains(ResourceKind::Role, role_name) {
            ledger.record_role(RoleRecord {
                name: role_name.to_string(),
                id: id.clone(),
                policies: vec![policy.reference().to_string()],
            })?;
        }

        Ok(ExecutionRole {
            name: role_name.to_string(),
            id,
        })
    }

    /// Deploy a unit and wait until it is active
    ///
    /// The unit is ledgered as soon as the backend accepts it.
    ///
    /// # Errors
    /// - `ChainError::Deployment` if the backend rejects it or it fails
    /// - `ChainError::DeploymentStall` if it never becomes active
    pub async fn deploy(
        &self,
        spec: UnitSpec,
        role: &ExecutionRole,
        ledger: &mut ResourceLedger,
    ) -> Result<WorkUnit, ChainError> {
        let unit = spec.name.clone();
        tracing::info!(unit = %unit, role = %role.name, "deploying work unit");

        match self.backend.deploy_unit(&self.authority, &spec, &role.id).await {
            Ok(()) => {}
            Err(BackendError::AlreadyExists(_)) => {
                tracing::warn!(unit = %unit, "work unit already deployed, reusing");
            }
            Err(err) => {
                return Err(ChainError::Deployment {
                    unit,
                    reason: err.to_string(),
                })
            }
        }

        if !ledger.contains(ResourceKind::WorkUnit, &unit) {
            ledger.record_work_unit(WorkUnitRecord {
                name: unit.clone(),
                role_name: role.name.clone(),
                state: UnitState::Deploying,
            })?;
        }

        self.wait_until_active(&unit).await?;

        Ok(WorkUnit {
            name: unit,
            payload: spec.payload,
            role: role.clone(),
            state: UnitState::Active,
        })
    }

    /// Bounded readiness poll
    ///
    /// # Errors
    /// `ChainError::DeploymentStall` after `max_polls` checks without
    /// reaching `Active`; `ChainError::Deployment` if the unit reports `Failed`.
    pub async fn wait_until_active(&self, unit: &str) -> Result<(), ChainError> {
        let backend = self.backend.as_ref();
        let authority = &self.authority;

        let outcome = poll_until(self.readiness.policy(), |attempt| async move {
            match backend.unit_state(authority, unit).await {
                Ok(UnitState::Active) => Check::Ready(()),
                Ok(UnitState::Failed) => Check::Abort("unit entered failed state".to_string()),
                Ok(UnitState::Deploying) => {
                    tracing::debug!(unit, attempt, "waiting for work unit to become active");
                    Check::Pending
                }
                Err(err) => {
                    tracing::debug!(unit, attempt, error = %err, "readiness check failed");
                    Check::Pending
                }
            }
        })
        .await;

        match outcome {
            PollOutcome::Ready { attempt, .. } => {
                tracing::info!(unit, attempt, "work unit active");
                Ok(())
            }
            PollOutcome::Exhausted { attempts } => Err(ChainError::DeploymentStall {
                unit: unit.to_string(),
                attempts,
            }),
            PollOutcome::Aborted { error, .. } => Err(ChainError::Deployment {
                unit: unit.to_string(),
                reason: error,
            }),
        }
    }

    /// Invoke an active unit with `input` as the hop's parent credentials
    ///
    /// # Errors
    /// `ChainError::Invocation` if the unit is not active, the backend call
    /// fails, or the output does not decode as a `HopResponse`.
    pub async fn invoke(
        &self,
        unit: &WorkUnit,
        hop: u32,
        input: &CredentialPair,
    ) -> Result<HopResponse, ChainError> {
        let invocation_error = |reason: String| ChainError::Invocation {
            unit: unit.name.clone(),
            hop,
            principal: None,
            reason,
        };

        if !unit.is_active() {
            return Err(invocation_error(format!("unit is {:?}", unit.state)));
        }

        let request = serde_json::to_value(HopRequest {
            credentials: input.clone(),
            hop,
        })
        .map_err(|err| invocation_error(format!("encode request: {err}")))?;

        tracing::info!(unit = %unit.name, hop, "invoking work unit");
        let output = self
            .backend
            .invoke_unit(&self.authority, &unit.name, request)
            .await
            .map_err(|err| invocation_error(err.to_string()))?;

        serde_json::from_value(output).map_err(|err| invocation_error(format!("malformed output: {err}")))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("authority", &self.authority)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

/// Where remote hops run
#[derive(Debug, Clone)]
pub enum UnitPlacement {
    /// One deployed unit serves every hop
    Shared(WorkUnit),
    /// A fresh unit `{prefix}{hop}` is deployed for each hop
    PerHop { template: UnitSpec, prefix: String },
}

/// Hop execution through a remote work unit
#[derive(Debug)]
pub struct RemoteHopExecutor {
    dispatcher: Dispatcher,
    role: ExecutionRole,
    placement: UnitPlacement,
    kind: PrincipalKind,
    policy: String,
    activation: ActivationConfig,
}

impl RemoteHopExecutor {
    /// Create executor; `policy` is what the remote hop grants, for the ledger
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        role: ExecutionRole,
        placement: UnitPlacement,
        policy: &PolicyGrant,
    ) -> Self {
        Self {
            dispatcher,
            role,
            placement,
            kind: PrincipalKind::User,
            policy: policy.reference().to_string(),
            activation: ActivationConfig::default(),
        }
    }

    /// With the principal kind the remote hop mints
    #[must_use]
    pub fn with_kind(mut self, kind: PrincipalKind) -> Self {
        self.kind = kind;
        self
    }

    /// With the activation settings the remote hop checks with
    #[must_use]
    pub fn with_activation(mut self, activation: ActivationConfig) -> Self {
        self.activation = activation;
        self
    }

    async fn unit_for(&self, hop: u32, ledger: &mut ResourceLedger) -> Result<WorkUnit, ChainError> {
        match &self.placement {
            UnitPlacement::Shared(unit) => Ok(unit.clone()),
            UnitPlacement::PerHop { template, prefix } => {
                let spec = template.renamed(format!("{prefix}{hop}"));
                self.dispatcher.deploy(spec, &self.role, ledger).await
            }
        }
    }

    fn record(
        &self,
        ledger: &mut ResourceLedger,
        name: &str,
        hop: u32,
        credentials: Option<CredentialPair>,
        policy_attached: bool,
    ) -> Result<(), ChainError> {
        if ledger.contains(ResourceKind::Principal, name) {
            return Ok(());
        }
        let policies = if policy_attached {
            vec![self.policy.clone()]
        } else {
            Vec::new()
        };
        ledger.record_principal(PrincipalRecord {
            name: name.to_string(),
            kind: self.kind,
            hop,
            credentials,
            policies,
        })?;
        Ok(())
    }
}

#[async_trait]
impl HopExecutor for RemoteHopExecutor {
    async fn execute_hop(
        &self,
        parent: &CredentialPair,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<HopOutcome, ChainError> {
        let unit = self.unit_for(hop, ledger).await?;
        let response = self.dispatcher.invoke(&unit, hop, parent).await?;
        let user_name = response.body.user_name.clone();

        match (response.status_code, user_name) {
            (status::OK, Some(name)) => {
                let Some(credentials) = response.credentials() else {
                    self.record(ledger, &name, hop, None, true)?;
                    return Err(ChainError::Invocation {
                        unit: unit.name,
                        hop,
                        principal: Some(name),
                        reason: "response lacks credentials".to_string(),
                    });
                };
                self.record(ledger, &name, hop, Some(credentials.clone()), true)?;
                Ok(HopOutcome::Activated {
                    principal: Principal {
                        name,
                        kind: self.kind,
                        attached_policies: vec![self.policy.clone()],
                        credential_id: Some(credentials.access_key_id.clone()),
                    },
                    credentials,
                })
            }
            (status::NOT_ACTIVATED, Some(name)) => {
                // Created and granted remotely; only activation failed
                self.record(ledger, &name, hop, None, true)?;
                Ok(HopOutcome::NotActivated {
                    principal: name,
                    attempts: self.activation.max_attempts,
                })
            }
            (code, name) => {
                if let Some(name) = &name {
                    self.record(ledger, name, hop, None, false)?;
                }
                Err(ChainError::Invocation {
                    unit: unit.name,
                    hop,
                    principal: name,
                    reason: format!(
                        "status {code}: {}",
                        response.body.error.as_deref().unwrap_or("no error detail")
                    ),
                })
            }
        }
    }
}
