//! Backend seams
//!
//! The identity control plane and the remote execution backend are external
//! collaborators. Integrators implement these traits; the chain components
//! only ever talk to them through `Arc<dyn ...>` or generics.

use crate::error::BackendError;
use crate::types::{
    CredentialPair, CredentialRequest, PolicyGrant, Principal, PrincipalKind, UnitSpec, UnitState,
};
use async_trait::async_trait;

/// Identity control plane
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Create a principal under `authority`
    ///
    /// # Errors
    /// `BackendError::AlreadyExists` when the name is taken; this must be
    /// distinguishable from every other failure.
    async fn create_principal(
        &self,
        authority: &CredentialPair,
        name: &str,
        kind: PrincipalKind,
    ) -> Result<(), BackendError>;

    /// Fetch an existing principal
    async fn get_principal(
        &self,
        authority: &CredentialPair,
        name: &str,
        kind: PrincipalKind,
    ) -> Result<Principal, BackendError>;

    /// Issue a credential pair for a principal
    async fn issue_credentials(
        &self,
        authority: &CredentialPair,
        name: &str,
        kind: PrincipalKind,
        request: CredentialRequest,
    ) -> Result<CredentialPair, BackendError>;

    /// Attach a policy to a principal
    async fn attach_policy(
        &self,
        authority: &CredentialPair,
        name: &str,
        kind: PrincipalKind,
        policy: &PolicyGrant,
    ) -> Result<(), BackendError>;

    /// List principal names; used as the read-only liveness check
    async fn list_principals(&self, credentials: &CredentialPair)
        -> Result<Vec<String>, BackendError>;
}

/// Remote execution backend hosting work units
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Create the role units execute under; returns its backend identifier
    async fn create_execution_role(
        &self,
        authority: &CredentialPair,
        role_name: &str,
        policy: &PolicyGrant,
    ) -> Result<String, BackendError>;

    /// Look up an existing execution role's backend identifier
    async fn get_execution_role(
        &self,
        authority: &CredentialPair,
        role_name: &str,
    ) -> Result<String, BackendError>;

    /// Submit a unit for deployment under `role_id`
    async fn deploy_unit(
        &self,
        authority: &CredentialPair,
        spec: &UnitSpec,
        role_id: &str,
    ) -> Result<(), BackendError>;

    /// Current readiness of a deployed unit
    async fn unit_state(
        &self,
        authority: &CredentialPair,
        unit_name: &str,
    ) -> Result<UnitState, BackendError>;

    /// Synchronous request/response invocation with JSON payloads
    async fn invoke_unit(
        &self,
        authority: &CredentialPair,
        unit_name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError>;
}
