//! Identity provisioner
//!
//! Mints one principal per call under the parent's authority, issues it a
//! credential pair and attaches the configured policy. Whatever was created
//! is ledgered before the call returns, including on partial failure.

use crate::backend::IdentityBackend;
use crate::error::{ChainError, Operation};
use crate::ledger::{PrincipalRecord, ResourceKind, ResourceLedger};
use crate::types::{
    CredentialPair, CredentialRequest, PolicyGrant, Principal, PrincipalKind, PrincipalNamer,
};
use std::sync::Arc;

/// Identity provisioner
pub struct IdentityProvisioner {
    backend: Arc<dyn IdentityBackend>,
    namer: PrincipalNamer,
    kind: PrincipalKind,
    request: CredentialRequest,
    policy: PolicyGrant,
}

impl IdentityProvisioner {
    /// Create provisioner granting `policy` to every new principal
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>, policy: PolicyGrant) -> Self {
        Self {
            backend,
            namer: PrincipalNamer::default(),
            kind: PrincipalKind::User,
            request: CredentialRequest::Permanent,
            policy,
        }
    }

    /// With principal name prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namer = PrincipalNamer::new(prefix);
        self
    }

    /// With principal kind
    #[must_use]
    pub fn with_kind(mut self, kind: PrincipalKind) -> Self {
        self.kind = kind;
        self
    }

    /// With credential request
    #[must_use]
    pub fn with_credentials(mut self, request: CredentialRequest) -> Self {
        self.request = request;
        self
    }

    /// Policy granted to new principals
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &PolicyGrant {
        &self.policy
    }

    /// Provision a principal with a fresh timestamp-derived name
    ///
    /// # Errors
    /// - `ChainError::Authorization` if the parent may not create, issue or attach
    /// - `ChainError::Provisioning` for any other backend failure
    /// - `ChainError::Ledger` if the ledger rejects the record
    pub async fn provision(
        &self,
        parent: &CredentialPair,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<(Principal, CredentialPair), ChainError> {
        let name = self.namer.next_name();
        self.provision_named(parent, &name, hop, ledger).await
    }

    /// Provision a principal under an explicit name
    ///
    /// Idempotent: if the name already exists the existing principal is
    /// returned without error and without a second ledger entry.
    pub async fn provision_named(
        &self,
        parent: &CredentialPair,
        name: &str,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<(Principal, CredentialPair), ChainError> {
        tracing::info!(hop, principal = name, kind = %self.kind, "provisioning principal");

        match self.backend.create_principal(parent, name, self.kind).await {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {
                tracing::warn!(hop, principal = name, "principal already exists, reusing");
                if let Some(existing) = self.ledgered(name, ledger) {
                    return Ok(existing);
                }
                return self.adopt_existing(parent, name, hop, ledger).await;
            }
            Err(err) => return Err(ChainError::from_backend(name, hop, Operation::CreatePrincipal, err)),
        }

        self.finish(parent, name, hop, ledger).await
    }

    /// Existing principal this ledger already holds credentials for
    fn ledgered(&self, name: &str, ledger: &ResourceLedger) -> Option<(Principal, CredentialPair)> {
        let record = ledger.principal(name)?;
        let credentials = record.credentials.clone()?;
        Some((
            Principal {
                name: record.name.clone(),
                kind: record.kind,
                attached_policies: record.policies.clone(),
                credential_id: Some(credentials.access_key_id.clone()),
            },
            credentials,
        ))
    }

    /// Existing principal created outside this ledger: confirm it, then
    /// issue and attach as for a new one
    async fn adopt_existing(
        &self,
        parent: &CredentialPair,
        name: &str,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<(Principal, CredentialPair), ChainError> {
        self.backend
            .get_principal(parent, name, self.kind)
            .await
            .map_err(|err| ChainError::from_backend(name, hop, Operation::CreatePrincipal, err))?;
        self.finish(parent, name, hop, ledger).await
    }

    /// Issue credentials, attach the policy, ledger the outcome
    async fn finish(
        &self,
        parent: &CredentialPair,
        name: &str,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<(Principal, CredentialPair), ChainError> {
        let issued = self
            .backend
            .issue_credentials(parent, name, self.kind, self.request)
            .await;

        let credentials = match issued {
            Ok(credentials) => credentials,
            Err(err) => {
                self.record(ledger, name, hop, None, Vec::new())?;
                return Err(ChainError::from_backend(name, hop, Operation::IssueCredentials, err));
            }
        };

        let attached = self
            .backend
            .attach_policy(parent, name, self.kind, &self.policy)
            .await;
        let policies = if attached.is_ok() {
            vec![self.policy.reference().to_string()]
        } else {
            Vec::new()
        };

        self.record(ledger, name, hop, Some(credentials.clone()), policies.clone())?;

        if let Err(err) = attached {
            return Err(ChainError::from_backend(name, hop, Operation::AttachPolicy, err));
        }

        tracing::info!(
            hop,
            principal = name,
            credential = %credentials.access_key_id,
            policy = self.policy.reference(),
            "principal provisioned"
        );

        Ok((
            Principal {
                name: name.to_string(),
                kind: self.kind,
                attached_policies: policies,
                credential_id: Some(credentials.access_key_id.clone()),
            },
            credentials,
        ))
    }

    fn record(
        &self,
        ledger: &mut ResourceLedger,
        name: &str,
        hop: u32,
        credentials: Option<CredentialPair>,
        policies: Vec<String>,
    ) -> Result<(), ChainError> {
        // An adopted principal keeps its first entry
        if ledger.contains(ResourceKind::Principal, name) {
            return Ok(());
        }
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

impl std::fmt::Debug for IdentityProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvisioner")
            .field("prefix", &self.namer.prefix())
            .field("kind", &self.kind)
            .field("request", &self.request)
            .field("policy", &self.policy.reference())
            .finish_non_exhaustive()
    }
}
