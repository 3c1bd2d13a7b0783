//! Hopchain Core - credential hop chains
//!
//! Starting from seed credentials, each hop:
//! - provisions a new principal under the current credentials
//! - issues it credentials and attaches an explicit policy
//! - checks until the new credentials are usable
//! - hands them to the next hop
//!
//! Hops run in-process or inside remotely deployed work units; every
//! resource created lands in an append-only ledger for later teardown.
//!
//! # Example
//!
//! ```rust,ignore
//! use hopchain_core::prelude::*;
//!
//! # async fn example(identity: std::sync::Arc<dyn IdentityBackend>, seed: CredentialPair)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let config = ChainConfig::from_file("chain.toml")?;
//! let executor = LocalHopExecutor::new(config.build_hop(identity));
//!
//! let mut ledger = ResourceLedger::new();
//! let report = EscalationChain::new(executor, seed, config.hops).run(&mut ledger).await;
//! ledger.write_teardown_json(&config.output.teardown_path)?;
//!
//! println!("completed {} hops", report.state.completed_hops);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod activation;
pub mod backend;
pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hop;
pub mod ledger;
pub mod poll;
pub mod provisioner;
pub mod types;

// Re-exports for convenience
pub use activation::{wait_for_activation, ActivationChecker, ActivationConfig};
pub use backend::{ExecutionBackend, IdentityBackend};
pub use chain::{run_sharded, ChainReport, EscalationChain, ShardResult};
pub use config::{ChainConfig, DispatchConfig, OutputConfig, PlacementMode};
pub use dispatcher::{Dispatcher, ReadinessConfig, RemoteHopExecutor, UnitPlacement};
pub use error::{BackendError, ChainError, LedgerError, Operation};
pub use hop::{
    serve_hop_request, ChainHop, HopExecutor, HopOutcome, HopRequest, HopResponse,
    HopResponseBody, LocalHopExecutor,
};
pub use ledger::{
    LedgerEntry, PrincipalRecord, ResourceAttributes, ResourceKind, ResourceLedger, RoleRecord,
    TeardownRecord, TeardownStep, WorkUnitRecord,
};
pub use provisioner::IdentityProvisioner;
pub use types::{
    ChainState, ChainStatus, CredentialPair, CredentialRequest, ExecutionRole, PolicyGrant,
    Principal, PrincipalKind, PrincipalNamer, UnitPayload, UnitSpec, UnitState, WorkUnit,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving chains
    pub use crate::{
        ChainConfig, ChainError, ChainReport, ChainStatus, CredentialPair, Dispatcher,
        EscalationChain, IdentityBackend, LocalHopExecutor, PolicyGrant, RemoteHopExecutor,
        ResourceLedger, UnitPlacement,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
