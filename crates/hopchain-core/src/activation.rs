//! Activation checker
//!
//! Freshly issued credentials are not valid everywhere at once. The checker
//! absorbs that propagation window with a bounded, fixed-delay retry of a
//! read-only call made with the new credentials.

use crate::backend::IdentityBackend;
use crate::poll::{poll_until, Check, PollOutcome, PollPolicy};
use crate::types::CredentialPair;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default check attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;

/// Default delay between checks
pub const DEFAULT_DELAY: Duration = Duration::from_secs(10);

/// Activation check settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Check attempts before reporting failure
    pub max_attempts: u32,
    /// Seconds between attempts
    pub delay_secs: u64,
}

impl ActivationConfig {
    /// Delay as a duration
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_secs: DEFAULT_DELAY.as_secs(),
        }
    }
}

/// Check `credentials` until they work or `max_attempts` run out
///
/// Returns `false` on exhaustion; the caller decides whether that halts
/// anything. Expired session credentials report `false` without a call.
/// Holds no state between calls.
pub async fn wait_for_activation<I>(
    backend: &I,
    credentials: &CredentialPair,
    max_attempts: u32,
    delay: Duration,
) -> bool
where
    I: IdentityBackend + ?Sized,
{
    if credentials.is_expired_at(Utc::now()) {
        tracing::warn!(credential = %credentials.access_key_id, "credentials expired before any check");
        return false;
    }

    let outcome: PollOutcome<(), ()> =
        poll_until(PollPolicy::new(max_attempts, delay), |attempt| async move {
            match backend.list_principals(credentials).await {
                Ok(_) => Check::Ready(()),
                Err(err) => {
                    tracing::debug!(
                        credential = %credentials.access_key_id,
                        attempt,
                        error = %err,
                        "credentials not active yet"
                    );
                    Check::Pending
                }
            }
        })
        .await;

    match outcome {
        PollOutcome::Ready { attempt, .. } => {
            tracing::info!(credential = %credentials.access_key_id, attempt, "credentials active");
            true
        }
        PollOutcome::Exhausted { attempts } => {
            tracing::warn!(credential = %credentials.access_key_id, attempts, "activation check exhausted");
            false
        }
        PollOutcome::Aborted { .. } => false,
    }
}

/// Activation checker bound to one identity backend
#[derive(Clone)]
pub struct ActivationChecker {
    backend: Arc<dyn IdentityBackend>,
    config: ActivationConfig,
}

impl ActivationChecker {
    /// Create checker with default attempts and delay
    #[inline]
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self::with_config(backend, ActivationConfig::default())
    }

    /// Create checker with explicit settings
    #[inline]
    #[must_use]
    pub fn with_config(backend: Arc<dyn IdentityBackend>, config: ActivationConfig) -> Self {
        Self { backend, config }
    }

    /// Check with the configured attempts and delay
    pub async fn wait_for_activation(&self, credentials: &CredentialPair) -> bool {
        wait_for_activation(
            self.backend.as_ref(),
            credentials,
            self.config.max_attempts,
            self.config.delay(),
        )
        .await
    }

    /// Configured settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ActivationConfig {
        &self.config
    }
}

impl std::fmt::Debug for ActivationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationChecker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::types::{CredentialRequest, PolicyGrant, Principal, PrincipalKind};
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::always;

    mock! {
        pub Identity {}

        #[async_trait]
        impl IdentityBackend for Identity {
            async fn create_principal(
                &self,
                authority: &CredentialPair,
                name: &str,
                kind: PrincipalKind,
            ) -> Result<(), BackendError>;
            async fn get_principal(
                &self,
                authority: &CredentialPair,
                name: &str,
                kind: PrincipalKind,
            ) -> Result<Principal, BackendError>;
            async fn issue_credentials(
                &self,
                authority: &CredentialPair,
                name: &str,
                kind: PrincipalKind,
                request: CredentialRequest,
            ) -> Result<CredentialPair, BackendError>;
            async fn attach_policy(
                &self,
                authority: &CredentialPair,
                name: &str,
                kind: PrincipalKind,
                policy: &PolicyGrant,
            ) -> Result<(), BackendError>;
            async fn list_principals(&self, credentials: &CredentialPair)
                -> Result<Vec<String>, BackendError>;
        }
    }

    fn pair() -> CredentialPair {
        CredentialPair::permanent("AKIANEW", "secret")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_propagation_delay() {
        let mut backend = MockIdentity::new();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_list_principals()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(BackendError::AccessDenied("invalid token".into())));
        backend
            .expect_list_principals()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["root".into()]));

        let start = tokio::time::Instant::now();
        assert!(wait_for_activation(&backend, &pair(), 6, Duration::from_secs(10)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_false_after_max_attempts() {
        let mut backend = MockIdentity::new();
        backend
            .expect_list_principals()
            .with(always())
            .times(6)
            .returning(|_| Err(BackendError::AccessDenied("invalid token".into())));

        let start = tokio::time::Instant::now();
        assert!(!wait_for_activation(&backend, &pair(), 6, Duration::from_secs(10)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test]
    async fn expired_session_skips_backend() {
        let mut backend = MockIdentity::new();
        backend.expect_list_principals().never();

        let expired = CredentialPair::session(
            "ASIA1",
            "secret",
            "token",
            Utc::now() - chrono::Duration::minutes(5),
        );
        assert!(!wait_for_activation(&backend, &expired, 6, Duration::ZERO).await);
    }

    #[test]
    fn default_config_matches_six_by_ten() {
        let config = ActivationConfig::default();
        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.delay(), Duration::from_secs(10));
    }
}
