use hopchain_core::prelude::*;
use hopchain_core::{
    run_sharded, BackendError, ExecutionRole, ReadinessConfig, ResourceKind, UnitState,
};
use hopchain_test_utils::{
    chain_config, seed_credentials, shared_hop, test_policy, test_unit_spec, InMemoryExecution,
    InMemoryIdentity, InvokeBehaviour,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const ROLE: &str = "HopExecutionRole";

fn readiness(max_polls: u32) -> ReadinessConfig {
    ReadinessConfig {
        poll_interval_secs: 10,
        max_polls,
    }
}

fn serving(identity: &InMemoryIdentity) -> InMemoryExecution {
    let hop = shared_hop(identity, &chain_config(1));
    InMemoryExecution::new(InvokeBehaviour::Serve(Arc::new(hop)))
}

async fn dispatcher_with_role(
    execution: &InMemoryExecution,
    ledger: &mut ResourceLedger,
) -> (Dispatcher, ExecutionRole) {
    let dispatcher = Dispatcher::new(Arc::new(execution.clone()), seed_credentials())
        .with_readiness(readiness(5));
    let role = dispatcher
        .prepare_role(ROLE, &test_policy(), ledger)
        .await
        .unwrap();
    (dispatcher, role)
}

#[tokio::test(start_paused = true)]
async fn deployment_that_never_activates_stalls() {
    let execution = serving(&InMemoryIdentity::new()).never_active();
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let dispatcher = dispatcher.with_readiness(readiness(3));
    let start = tokio::time::Instant::now();

    let err = dispatcher
        .deploy(test_unit_spec("hop-unit-1"), &role, &mut ledger)
        .await
        .unwrap_err();

    match err {
        ChainError::DeploymentStall { unit, attempts } => {
            assert_eq!(unit, "hop-unit-1");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected deployment stall, got {other:?}"),
    }
    assert_eq!(execution.readiness_polls(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
    // The stalled unit is still ledgered for teardown
    assert!(ledger.contains(ResourceKind::WorkUnit, "hop-unit-1"));
}

#[tokio::test(start_paused = true)]
async fn failed_unit_reports_deployment_error() {
    let execution = serving(&InMemoryIdentity::new()).fail_deploy();
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;

    let err = dispatcher
        .deploy(test_unit_spec("hop-unit-1"), &role, &mut ledger)
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Deployment { .. }));
    assert_eq!(execution.readiness_polls(), 1);
}

#[tokio::test(start_paused = true)]
async fn deploy_waits_for_active() {
    let execution = serving(&InMemoryIdentity::new()).active_after(2);
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;

    let unit = dispatcher
        .deploy(test_unit_spec("hop-unit-1"), &role, &mut ledger)
        .await
        .unwrap();

    assert_eq!(unit.state, UnitState::Active);
    assert_eq!(unit.role.name, ROLE);
    assert_eq!(execution.readiness_polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_output_is_an_invocation_error() {
    let execution = InMemoryExecution::new(InvokeBehaviour::Fixed(json!({ "unexpected": true })));
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let unit = dispatcher
        .deploy(test_unit_spec("hop-unit-1"), &role, &mut ledger)
        .await
        .unwrap();

    let err = dispatcher
        .invoke(&unit, 1, &seed_credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Invocation { hop: 1, .. }));
    assert!(err.to_string().contains("malformed output"));
}

#[tokio::test(start_paused = true)]
async fn backend_invoke_failure_is_an_invocation_error() {
    let execution = InMemoryExecution::new(InvokeBehaviour::Error(BackendError::Throttled));
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let unit = dispatcher
        .deploy(test_unit_spec("hop-unit-1"), &role, &mut ledger)
        .await
        .unwrap();

    let err = dispatcher
        .invoke(&unit, 2, &seed_credentials())
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::Invocation { hop: 2, .. }));
}

#[tokio::test(start_paused = true)]
async fn invocation_sends_parent_credentials_as_json() {
    let identity = InMemoryIdentity::new();
    let execution = serving(&identity);
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let unit = dispatcher
        .deploy(test_unit_spec("hop-unit-1"), &role, &mut ledger)
        .await
        .unwrap();

    let response = dispatcher
        .invoke(&unit, 1, &seed_credentials())
        .await
        .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.credentials().unwrap().access_key_id, "AKIA0001");
    let (name, payload) = &execution.invocations()[0];
    assert_eq!(name, "hop-unit-1");
    assert_eq!(payload["access_key_id"], "AKIASEED");
    assert_eq!(payload["hop"], 1);
}

#[tokio::test(start_paused = true)]
async fn shared_unit_runs_every_hop() {
    let identity = InMemoryIdentity::new();
    let execution = serving(&identity);
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let unit = dispatcher
        .deploy(test_unit_spec("hop-unit-shared"), &role, &mut ledger)
        .await
        .unwrap();
    let executor = RemoteHopExecutor::new(
        dispatcher,
        role,
        UnitPlacement::Shared(unit),
        &test_policy(),
    );

    let report = EscalationChain::new(executor, seed_credentials(), 3)
        .run(&mut ledger)
        .await;

    assert!(report.succeeded());
    assert_eq!(report.credentials().access_key_id, "AKIA0003");
    assert_eq!(execution.deployed_units(), ["hop-unit-shared"]);
    assert_eq!(execution.invocations().len(), 3);
    // role + unit + 3 principals
    assert_eq!(ledger.len(), 5);
    assert_eq!(ledger.principals().count(), 3);

    // Each hop was invoked with the previous hop's credentials
    let parents: Vec<String> = execution
        .invocations()
        .iter()
        .map(|(_, p)| p["access_key_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(parents, ["AKIASEED", "AKIA0001", "AKIA0002"]);
}

#[tokio::test(start_paused = true)]
async fn per_hop_placement_deploys_fresh_units() {
    let identity = InMemoryIdentity::new();
    let execution = serving(&identity).active_after(1);
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let executor = RemoteHopExecutor::new(
        dispatcher,
        role,
        UnitPlacement::PerHop {
            template: test_unit_spec("template"),
            prefix: "hop-unit-".to_string(),
        },
        &test_policy(),
    );

    let report = EscalationChain::new(executor, seed_credentials(), 3)
        .run(&mut ledger)
        .await;

    assert!(report.succeeded());
    assert_eq!(
        execution.deployed_units(),
        ["hop-unit-1", "hop-unit-2", "hop-unit-3"]
    );
    let record = ledger.to_teardown_record();
    assert_eq!(record.roles.len(), 1);
    assert_eq!(record.work_units.len(), 3);
    assert_eq!(record.principals.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn remote_activation_failure_halts_and_ledgers_principal() {
    let identity = InMemoryIdentity::new().never_activate(2);
    let execution = serving(&identity);
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let unit = dispatcher
        .deploy(test_unit_spec("hop-unit-shared"), &role, &mut ledger)
        .await
        .unwrap();
    let executor =
        RemoteHopExecutor::new(dispatcher, role, UnitPlacement::Shared(unit), &test_policy());

    let report = EscalationChain::new(executor, seed_credentials(), 3)
        .run(&mut ledger)
        .await;

    assert_eq!(report.halted_at(), Some(2));
    assert!(matches!(
        report.failure,
        Some(ChainError::ActivationTimeout { hop: 2, .. })
    ));
    assert_eq!(report.credentials().access_key_id, "AKIA0001");
    let hops: Vec<u32> = ledger.principals().map(|p| p.hop).collect();
    assert_eq!(hops, [1, 2]);

    // Granted remotely, so teardown still detaches the policy
    let unconfirmed = ledger.principals().nth(1).unwrap();
    assert!(unconfirmed.credentials.is_none());
    assert_eq!(unconfirmed.policies, [test_policy().reference()]);
}

#[tokio::test(start_paused = true)]
async fn remote_error_body_names_principal() {
    let execution = InMemoryExecution::new(InvokeBehaviour::Fixed(json!({
        "statusCode": 500,
        "body": { "user_name": "nested_user_9", "error": "attach policy denied" }
    })));
    let mut ledger = ResourceLedger::new();
    let (dispatcher, role) = dispatcher_with_role(&execution, &mut ledger).await;
    let unit = dispatcher
        .deploy(test_unit_spec("hop-unit-1"), &role, &mut ledger)
        .await
        .unwrap();
    let executor =
        RemoteHopExecutor::new(dispatcher, role, UnitPlacement::Shared(unit), &test_policy());

    let report = EscalationChain::new(executor, seed_credentials(), 2)
        .run(&mut ledger)
        .await;

    let err = report.failure.expect("invocation failure");
    assert!(matches!(err, ChainError::Invocation { hop: 1, .. }));
    assert_eq!(err.principal(), Some("nested_user_9"));
    assert!(ledger.contains(ResourceKind::Principal, "nested_user_9"));
}

#[tokio::test(start_paused = true)]
async fn existing_role_is_reused_once() {
    let execution = serving(&InMemoryIdentity::new());
    let mut ledger = ResourceLedger::new();
    let (dispatcher, first) = dispatcher_with_role(&execution, &mut ledger).await;

    let second = dispatcher
        .prepare_role(ROLE, &test_policy(), &mut ledger)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(ledger.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn sharded_chains_are_independent() {
    let healthy = InMemoryIdentity::new();
    let broken = InMemoryIdentity::new().never_activate(1);
    let config = chain_config(2);
    let chains = vec![
        EscalationChain::new(
            LocalHopExecutor::new(shared_hop(&healthy, &config)),
            seed_credentials(),
            2,
        ),
        EscalationChain::new(
            LocalHopExecutor::new(shared_hop(&broken, &config)),
            seed_credentials(),
            2,
        ),
    ];

    let results = run_sharded(chains).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].report.succeeded());
    assert_eq!(results[0].ledger.len(), 2);
    assert_eq!(results[1].report.halted_at(), Some(1));
    assert_eq!(results[1].ledger.len(), 1);
}
