//! Escalation chain driver
//!
//! Strictly linear: hop k+1 uses exactly hop k's credentials as authority.
//!
//! ```text
//! running --(hop activated, k == target)--> succeeded
//! running --(check exhausted | hop error)--> halted-on-failure
//! ```
//!
//! No retry at this level; retries live in the checker. Nothing is rolled
//! back on halt; the ledger keeps what was created.

use crate::error::ChainError;
use crate::hop::{HopExecutor, HopOutcome};
use crate::ledger::ResourceLedger;
use crate::types::{ChainState, ChainStatus, CredentialPair};
use futures::future::join_all;

/// Final report of a chain run
#[derive(Debug)]
pub struct ChainReport {
    /// State at termination
    pub state: ChainState,
    /// Why the chain halted, if it did
    pub failure: Option<ChainError>,
}

impl ChainReport {
    /// Check if every hop completed
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state.status == ChainStatus::Succeeded
    }

    /// Hop number the chain halted at (1-based)
    #[must_use]
    pub fn halted_at(&self) -> Option<u32> {
        match self.state.status {
            ChainStatus::HaltedOnFailure => Some(self.state.next_hop()),
            _ => None,
        }
    }

    /// Last confirmed credentials (the seed if no hop completed)
    #[inline]
    #[must_use]
    pub fn credentials(&self) -> &CredentialPair {
        &self.state.current
    }
}

/// Escalation chain driver
#[derive(Debug)]
pub struct EscalationChain<H> {
    executor: H,
    state: ChainState,
}

impl<H: HopExecutor> EscalationChain<H> {
    /// Create chain from seed credentials
    #[inline]
    #[must_use]
    pub fn new(executor: H, seed: CredentialPair, target_hops: u32) -> Self {
        Self {
            executor,
            state: ChainState::new(seed, target_hops),
        }
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Hop executor
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &H {
        &self.executor
    }

    /// Run one hop; no-op once terminal
    ///
    /// # Errors
    /// The halting error when this hop moves the chain to
    /// `HaltedOnFailure`.
    pub async fn step(&mut self, ledger: &mut ResourceLedger) -> Result<ChainStatus, ChainError> {
        if self.state.status.is_terminal() {
            return Ok(self.state.status);
        }

        let hop = self.state.next_hop();
        tracing::info!(hop, target = self.state.target_hops, "starting hop");

        if let Err(err) = self.state.current.ensure_usable() {
            return Err(self.halt(err));
        }

        let outcome = self
            .executor
            .execute_hop(&self.state.current, hop, ledger)
            .await;

        match outcome {
            Ok(HopOutcome::Activated {
                principal,
                credentials,
            }) => {
                self.state.completed_hops = hop;
                self.state.current = credentials;
                tracing::info!(hop, principal = %principal.name, "hop completed");
                if self.state.completed_hops >= self.state.target_hops {
                    self.state.status = ChainStatus::Succeeded;
                    tracing::info!(hops = self.state.completed_hops, "chain succeeded");
                }
                Ok(self.state.status)
            }
            Ok(HopOutcome::NotActivated {
                principal,
                attempts,
            }) => Err(self.halt(ChainError::ActivationTimeout {
                principal,
                hop,
                attempts,
            })),
            Err(err) => Err(self.halt(err)),
        }
    }

    /// Run until terminal
    pub async fn run(mut self, ledger: &mut ResourceLedger) -> ChainReport {
        let mut failure = None;
        while !self.state.status.is_terminal() {
            if let Err(err) = self.step(ledger).await {
                failure = Some(err);
            }
        }
        ChainReport {
            state: self.state,
            failure,
        }
    }

    fn halt(&mut self, err: ChainError) -> ChainError {
        self.state.status = ChainStatus::HaltedOnFailure;
        tracing::warn!(
            hop = self.state.next_hop(),
            completed = self.state.completed_hops,
            principal = err.principal().unwrap_or("-"),
            error = %err,
            "chain halted"
        );
        err
    }
}

/// Outcome of one shard in a fan-out
#[derive(Debug)]
pub struct ShardResult {
    /// Shard position in the input
    pub shard: usize,
    /// Chain report
    pub report: ChainReport,
    /// The shard's private ledger
    pub ledger: ResourceLedger,
}

/// Drive independent chains concurrently
///
/// Each chain owns its credentials and ledger; a halt in one shard does not
/// touch the others. Results come back in input order, but no ordering
/// between shards' hops is implied.
pub async fn run_sharded<H: HopExecutor>(chains: Vec<EscalationChain<H>>) -> Vec<ShardResult> {
    let shards = chains.into_iter().enumerate().map(|(shard, chain)| async move {
        let mut ledger = ResourceLedger::new();
        let report = chain.run(&mut ledger).await;
        if let Some(err) = &report.failure {
            tracing::warn!(shard, error = %err, "shard halted");
        }
        ShardResult {
            shard,
            report,
            ledger,
        }
    });
    join_all(shards).await
}
