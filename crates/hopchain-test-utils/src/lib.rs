//! Testing utilities for the Hopchain workspace
//!
//! In-memory identity and execution backends with scripted behaviour.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hopchain_core::{
    serve_hop_request, BackendError, ChainConfig, ChainHop, CredentialPair, CredentialRequest,
    ExecutionBackend, IdentityBackend, LocalHopExecutor, PolicyGrant, Principal, PrincipalKind,
    UnitPayload, UnitSpec, UnitState,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const MAX_SESSION_SECS: u64 = 43_200;

/// Seed credentials every in-memory backend accepts
pub fn seed_credentials() -> CredentialPair {
    CredentialPair::permanent("AKIASEED", "seed-secret")
}

pub fn test_policy() -> PolicyGrant {
    PolicyGrant::managed("arn:aws:iam::aws:policy/ReadOnlyAccess")
}

pub fn chain_config(hops: u32) -> ChainConfig {
    ChainConfig::new(hops, test_policy())
}

pub fn shared_hop(identity: &InMemoryIdentity, config: &ChainConfig) -> ChainHop {
    config.build_hop(Arc::new(identity.clone()))
}

pub fn local_executor(identity: &InMemoryIdentity, config: &ChainConfig) -> LocalHopExecutor {
    LocalHopExecutor::new(shared_hop(identity, config))
}

pub fn test_unit_spec(name: &str) -> UnitSpec {
    UnitSpec::new(
        name,
        UnitPayload {
            entry_point: "handler.serve_hop".to_string(),
            runtime: "provided.al2023".to_string(),
            artifact: vec![0x7f, b'E', b'L', b'F'],
        },
    )
}

#[derive(Debug, Default)]
struct IdentityState {
    principals: HashMap<String, Principal>,
    /// access key id -> remaining failed checks before the key works
    pending: HashMap<String, u32>,
    issued: u32,
    /// Check misses for the n-th issued key (1-based), default 0
    activation_delays: HashMap<u32, u32>,
    never_activate: HashSet<u32>,
    deny_attach: bool,
    deny_create: bool,
    liveness_checks: u32,
    issue_calls: u32,
}

/// In-memory identity control plane
///
/// Keys issued for principals become valid after a scripted number of
/// failed checks; the seed key is always valid.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentity {
    state: Arc<Mutex<IdentityState>>,
}

impl InMemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// The n-th issued key (1-based) fails `misses` checks first
    pub fn with_activation_delay(self, nth: u32, misses: u32) -> Self {
        self.state.lock().activation_delays.insert(nth, misses);
        self
    }

    /// The n-th issued key (1-based) never becomes valid
    pub fn never_activate(self, nth: u32) -> Self {
        self.state.lock().never_activate.insert(nth);
        self
    }

    /// Every policy attachment is denied
    pub fn deny_attach(self) -> Self {
        self.state.lock().deny_attach = true;
        self
    }

    /// Every principal creation is denied
    pub fn deny_create(self) -> Self {
        self.state.lock().deny_create = true;
        self
    }

    /// Register a principal that exists before the chain starts
    pub fn with_existing(self, name: &str) -> Self {
        self.state.lock().principals.insert(
            name.to_string(),
            Principal {
                name: name.to_string(),
                kind: PrincipalKind::User,
                attached_policies: Vec::new(),
                credential_id: None,
            },
        );
        self
    }

    pub fn principal_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().principals.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn principal(&self, name: &str) -> Option<Principal> {
        self.state.lock().principals.get(name).cloned()
    }

    pub fn liveness_checks(&self) -> u32 {
        self.state.lock().liveness_checks
    }

    pub fn issue_calls(&self) -> u32 {
        self.state.lock().issue_calls
    }

    fn authorize(state: &IdentityState, authority: &CredentialPair) -> Result<(), BackendError> {
        if authority.access_key_id == seed_credentials().access_key_id {
            return Ok(());
        }
        match state.pending.get(&authority.access_key_id) {
            Some(0) => Ok(()),
            Some(_) => Err(BackendError::AccessDenied("invalid client token".into())),
            None => Err(BackendError::AccessDenied("unknown access key".into())),
        }
    }
}

#[async_trait]
impl IdentityBackend for InMemoryIdentity {
    async fn create_principal(
        &self,
        authority: &CredentialPair,
        name: &str,
        kind: PrincipalKind,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::authorize(&state, authority)?;
        if state.deny_create {
            return Err(BackendError::AccessDenied("create not permitted".into()));
        }
        if state.principals.contains_key(name) {
            return Err(BackendError::AlreadyExists(name.to_string()));
        }
        state.principals.insert(
            name.to_string(),
            Principal {
                name: name.to_string(),
                kind,
                attached_policies: Vec::new(),
                credential_id: None,
            },
        );
        Ok(())
    }

    async fn get_principal(
        &self,
        authority: &CredentialPair,
        name: &str,
        _kind: PrincipalKind,
    ) -> Result<Principal, BackendError> {
        let state = self.state.lock();
        Self::authorize(&state, authority)?;
        state
            .principals
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn issue_credentials(
        &self,
        authority: &CredentialPair,
        name: &str,
        _kind: PrincipalKind,
        request: CredentialRequest,
    ) -> Result<CredentialPair, BackendError> {
        let mut state = self.state.lock();
        state.issue_calls += 1;
        Self::authorize(&state, authority)?;
        if !state.principals.contains_key(name) {
            return Err(BackendError::NotFound(name.to_string()));
        }

        state.issued += 1;
        let nth = state.issued;
        let key_id = format!("AKIA{nth:04}");
        let secret = format!("secret-{nth}");
        let misses = if state.never_activate.contains(&nth) {
            u32::MAX
        } else {
            state.activation_delays.get(&nth).copied().unwrap_or(0)
        };
        state.pending.insert(key_id.clone(), misses);
        if let Some(p) = state.principals.get_mut(name) {
            p.credential_id = Some(key_id.clone());
        }

        Ok(match request {
            CredentialRequest::Permanent => CredentialPair::permanent(key_id, secret),
            CredentialRequest::Session { duration_secs } => CredentialPair::session(
                key_id,
                secret,
                format!("token-{nth}"),
                Utc::now() + Duration::seconds(i64::try_from(duration_secs.min(MAX_SESSION_SECS)).unwrap_or(0)),
            ),
        })
    }

    async fn attach_policy(
        &self,
        authority: &CredentialPair,
        name: &str,
        _kind: PrincipalKind,
        policy: &PolicyGrant,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        Self::authorize(&state, authority)?;
        if state.deny_attach {
            return Err(BackendError::AccessDenied("attach not permitted".into()));
        }
        let principal = state
            .principals
            .get_mut(name)
            .ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        principal.attached_policies.push(policy.reference().to_string());
        Ok(())
    }

    async fn list_principals(
        &self,
        credentials: &CredentialPair,
    ) -> Result<Vec<String>, BackendError> {
        let mut state = self.state.lock();
        state.liveness_checks += 1;
        if credentials.access_key_id != seed_credentials().access_key_id {
            match state.pending.get_mut(&credentials.access_key_id) {
                Some(0) => {}
                Some(misses) => {
                    if *misses != u32::MAX {
                        *misses -= 1;
                    }
                    return Err(BackendError::AccessDenied("invalid client token".into()));
                }
                None => return Err(BackendError::AccessDenied("unknown access key".into())),
            }
        }
        Ok(state.principals.keys().cloned().collect())
    }
}

/// How deployed units answer invocations
#[derive(Clone)]
pub enum InvokeBehaviour {
    /// Run the shared hop logic, like a real deployed unit
    Serve(Arc<ChainHop>),
    /// Return this value verbatim
    Fixed(serde_json::Value),
    /// Fail the invocation call itself
    Error(BackendError),
}

#[derive(Default)]
struct ExecutionState {
    roles: HashMap<String, String>,
    units: HashMap<String, u32>,
    deploy_order: Vec<String>,
    invocations: Vec<(String, serde_json::Value)>,
    readiness_polls: u32,
}

/// In-memory execution backend
///
/// Units report `Deploying` for a scripted number of polls, then `Active`.
#[derive(Clone)]
pub struct InMemoryExecution {
    state: Arc<Mutex<ExecutionState>>,
    polls_until_active: Option<u32>,
    fail_deploy: bool,
    behaviour: InvokeBehaviour,
}

impl InMemoryExecution {
    pub fn new(behaviour: InvokeBehaviour) -> Self {
        Self {
            state: Arc::new(Mutex::new(ExecutionState::default())),
            polls_until_active: Some(0),
            fail_deploy: false,
            behaviour,
        }
    }

    /// Units need `polls` readiness checks in `Deploying` first
    pub fn active_after(mut self, polls: u32) -> Self {
        self.polls_until_active = Some(polls);
        self
    }

    /// Units stay in `Deploying` forever
    pub fn never_active(mut self) -> Self {
        self.polls_until_active = None;
        self
    }

    /// Units report `Failed`
    pub fn fail_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    pub fn deployed_units(&self) -> Vec<String> {
        self.state.lock().deploy_order.clone()
    }

    pub fn invocations(&self) -> Vec<(String, serde_json::Value)> {
        self.state.lock().invocations.clone()
    }

    pub fn readiness_polls(&self) -> u32 {
        self.state.lock().readiness_polls
    }
}

#[async_trait]
impl ExecutionBackend for InMemoryExecution {
    async fn create_execution_role(
        &self,
        _authority: &CredentialPair,
        role_name: &str,
        _policy: &PolicyGrant,
    ) -> Result<String, BackendError> {
        let mut state = self.state.lock();
        if state.roles.contains_key(role_name) {
            return Err(BackendError::AlreadyExists(role_name.to_string()));
        }
        let id = format!("arn:aws:iam::000000000000:role/{role_name}");
        state.roles.insert(role_name.to_string(), id.clone());
        Ok(id)
    }

    async fn get_execution_role(
        &self,
        _authority: &CredentialPair,
        role_name: &str,
    ) -> Result<String, BackendError> {
        self.state
            .lock()
            .roles
            .get(role_name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(role_name.to_string()))
    }

    async fn deploy_unit(
        &self,
        _authority: &CredentialPair,
        spec: &UnitSpec,
        role_id: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if !state.roles.values().any(|id| id == role_id) {
            return Err(BackendError::NotFound(role_id.to_string()));
        }
        if state.units.contains_key(&spec.name) {
            return Err(BackendError::AlreadyExists(spec.name.clone()));
        }
        state.units.insert(spec.name.clone(), 0);
        state.deploy_order.push(spec.name.clone());
        Ok(())
    }

    async fn unit_state(
        &self,
        _authority: &CredentialPair,
        unit_name: &str,
    ) -> Result<UnitState, BackendError> {
        let mut state = self.state.lock();
        state.readiness_polls += 1;
        let polls = state
            .units
            .get_mut(unit_name)
            .ok_or_else(|| BackendError::NotFound(unit_name.to_string()))?;
        *polls += 1;
        if self.fail_deploy {
            return Ok(UnitState::Failed);
        }
        Ok(match self.polls_until_active {
            Some(needed) if *polls > needed => UnitState::Active,
            _ => UnitState::Deploying,
        })
    }

    async fn invoke_unit(
        &self,
        _authority: &CredentialPair,
        unit_name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, BackendError> {
        {
            let mut state = self.state.lock();
            if !state.units.contains_key(unit_name) {
                return Err(BackendError::NotFound(unit_name.to_string()));
            }
            state.invocations.push((unit_name.to_string(), payload.clone()));
        }
        match &self.behaviour {
            InvokeBehaviour::Serve(hop) => Ok(serve_hop_request(hop, payload).await),
            InvokeBehaviour::Fixed(value) => Ok(value.clone()),
            InvokeBehaviour::Error(err) => Err(err.clone()),
        }
    }
}
