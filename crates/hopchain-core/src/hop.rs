//! Chain hop
//!
//! One hop is defined once here (provision, then check) and reaches the
//! driver through `HopExecutor`:
//! - `LocalHopExecutor` calls it in-process
//! - `RemoteHopExecutor` (see `dispatcher`) invokes a deployed unit whose
//!   entry point is `serve_hop_request`, which runs the same `ChainHop`

use crate::activation::ActivationChecker;
use crate::error::ChainError;
use crate::ledger::ResourceLedger;
use crate::provisioner::IdentityProvisioner;
use crate::types::{CredentialPair, Principal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one hop that got as far as issuing credentials
#[derive(Debug, Clone)]
pub enum HopOutcome {
    /// New credentials confirmed usable
    Activated {
        principal: Principal,
        credentials: CredentialPair,
    },
    /// Principal created but its credentials never became usable
    NotActivated { principal: String, attempts: u32 },
}

/// Executes a single hop from parent credentials
#[async_trait]
pub trait HopExecutor: Send + Sync {
    /// Run hop number `hop` (1-based) with `parent` as authority
    ///
    /// Every resource created is in `ledger` when this returns.
    async fn execute_hop(
        &self,
        parent: &CredentialPair,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<HopOutcome, ChainError>;
}

/// Provisioner + checker, the body of every hop
#[derive(Debug)]
pub struct ChainHop {
    provisioner: IdentityProvisioner,
    checker: ActivationChecker,
}

impl ChainHop {
    /// Create hop from its two halves
    #[inline]
    #[must_use]
    pub fn new(provisioner: IdentityProvisioner, checker: ActivationChecker) -> Self {
        Self {
            provisioner,
            checker,
        }
    }

    /// Provision one principal and wait for its credentials
    pub async fn run(
        &self,
        parent: &CredentialPair,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<HopOutcome, ChainError> {
        let (principal, credentials) = self.provisioner.provision(parent, hop, ledger).await?;

        if self.checker.wait_for_activation(&credentials).await {
            Ok(HopOutcome::Activated {
                principal,
                credentials,
            })
        } else {
            Ok(HopOutcome::NotActivated {
                principal: principal.name,
                attempts: self.checker.config().max_attempts,
            })
        }
    }

    /// Provisioner half
    #[inline]
    #[must_use]
    pub fn provisioner(&self) -> &IdentityProvisioner {
        &self.provisioner
    }
}

/// In-process hop execution
#[derive(Debug)]
pub struct LocalHopExecutor {
    hop: ChainHop,
}

impl LocalHopExecutor {
    /// Wrap a hop
    #[inline]
    #[must_use]
    pub fn new(hop: ChainHop) -> Self {
        Self { hop }
    }
}

#[async_trait]
impl HopExecutor for LocalHopExecutor {
    async fn execute_hop(
        &self,
        parent: &CredentialPair,
        hop: u32,
        ledger: &mut ResourceLedger,
    ) -> Result<HopOutcome, ChainError> {
        self.hop.run(parent, hop, ledger).await
    }
}

/// Invocation input for a remote hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRequest {
    /// Parent credentials
    #[serde(flatten)]
    pub credentials: CredentialPair,
    /// Hop number, for the unit's own logs
    #[serde(default = "first_hop")]
    pub hop: u32,
}

fn first_hop() -> u32 {
    1
}

/// HTTP-style status codes carried in `HopResponse`
pub mod status {
    /// Hop completed and credentials are active
    pub const OK: u16 = 200;
    /// Request could not be decoded
    pub const BAD_REQUEST: u16 = 400;
    /// Hop failed before activation checks
    pub const FAILED: u16 = 500;
    /// Principal created but credentials never became active
    pub const NOT_ACTIVATED: u16 = 504;
}

/// Invocation output of a remote hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: HopResponseBody,
}

/// Body of a `HopResponse`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HopResponse {
    fn failure(status_code: u16, user_name: Option<String>, error: impl Into<String>) -> Self {
        Self {
            status_code,
            body: HopResponseBody {
                user_name,
                error: Some(error.into()),
                ..HopResponseBody::default()
            },
        }
    }

    /// Credentials carried by a successful response
    #[must_use]
    pub fn credentials(&self) -> Option<CredentialPair> {
        let body = &self.body;
        Some(CredentialPair {
            access_key_id: body.access_key_id.clone()?,
            secret_access_key: body.secret_access_key.clone()?,
            session_token: body.session_token.clone(),
            expires_at: body.expires_at,
        })
    }
}

/// Entry point of a deployed work unit
///
/// Decodes the request, runs `hop` against a unit-local ledger and encodes
/// the outcome. Never fails: every error becomes a non-200 response.
pub async fn serve_hop_request(hop: &ChainHop, request: serde_json::Value) -> serde_json::Value {
    let response = match serde_json::from_value::<HopRequest>(request) {
        Ok(request) => answer(hop, request).await,
        Err(err) => HopResponse::failure(status::BAD_REQUEST, None, format!("bad request: {err}")),
    };
    serde_json::to_value(&response).unwrap_or_else(|err| {
        serde_json::json!({ "statusCode": status::FAILED, "body": { "error": err.to_string() } })
    })
}

async fn answer(hop: &ChainHop, request: HopRequest) -> HopResponse {
    let mut ledger = ResourceLedger::new();
    match hop.run(&request.credentials, request.hop, &mut ledger).await {
        Ok(HopOutcome::Activated {
            principal,
            credentials,
        }) => HopResponse {
            status_code: status::OK,
            body: HopResponseBody {
                user_name: Some(principal.name),
                access_key_id: Some(credentials.access_key_id),
                secret_access_key: Some(credentials.secret_access_key),
                session_token: credentials.session_token,
                expires_at: credentials.expires_at,
                error: None,
            },
        },
        Ok(HopOutcome::NotActivated { principal, .. }) => HopResponse::failure(
            status::NOT_ACTIVATED,
            Some(principal),
            "new credentials not activated",
        ),
        Err(err) => {
            let user_name = err
                .principal()
                .map(str::to_string)
                .or_else(|| ledger.principals().last().map(|p| p.name.clone()));
            HopResponse::failure(status::FAILED, user_name, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_flat_credentials() {
        let request: HopRequest = serde_json::from_value(serde_json::json!({
            "access_key_id": "AKIA1",
            "secret_access_key": "s"
        }))
        .unwrap();
        assert_eq!(request.credentials.access_key_id, "AKIA1");
        assert_eq!(request.hop, 1);
    }

    #[test]
    fn response_wire_shape() {
        let response = HopResponse {
            status_code: status::OK,
            body: HopResponseBody {
                user_name: Some("nested_user_1".into()),
                access_key_id: Some("AKIA2".into()),
                secret_access_key: Some("s2".into()),
                ..HopResponseBody::default()
            },
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["body"]["user_name"], "nested_user_1");
        assert!(value["body"].get("error").is_none());
        assert_eq!(response.credentials().unwrap().access_key_id, "AKIA2");
    }

    #[test]
    fn failure_has_no_credentials() {
        let response = HopResponse::failure(status::NOT_ACTIVATED, Some("p".into()), "timeout");
        assert!(response.credentials().is_none());
    }
}
