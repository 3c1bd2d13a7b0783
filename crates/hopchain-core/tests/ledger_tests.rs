use hopchain_core::prelude::*;
use hopchain_core::{PrincipalKind, TeardownRecord, TeardownStep, UnitState};
use hopchain_test_utils::{
    chain_config, local_executor, seed_credentials, shared_hop, test_policy, test_unit_spec,
    InMemoryExecution, InMemoryIdentity, InvokeBehaviour,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

async fn two_hop_remote_ledger() -> ResourceLedger {
    let identity = InMemoryIdentity::new();
    let hop = shared_hop(&identity, &chain_config(1));
    let execution = InMemoryExecution::new(InvokeBehaviour::Serve(Arc::new(hop)));
    let dispatcher = Dispatcher::new(Arc::new(execution), seed_credentials());
    let mut ledger = ResourceLedger::new();

    let role = dispatcher
        .prepare_role("HopExecutionRole", &test_policy(), &mut ledger)
        .await
        .unwrap();
    let executor = RemoteHopExecutor::new(
        dispatcher,
        role,
        UnitPlacement::PerHop {
            template: test_unit_spec("template"),
            prefix: "hop-unit-".to_string(),
        },
        &test_policy(),
    );
    let report = EscalationChain::new(executor, seed_credentials(), 2)
        .run(&mut ledger)
        .await;
    assert!(report.succeeded());
    ledger
}

#[tokio::test(start_paused = true)]
async fn teardown_record_round_trips_through_disk() {
    let ledger = two_hop_remote_ledger().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generated_resources.json");

    ledger.write_teardown_json(&path).unwrap();
    let record = TeardownRecord::read_json(&path).unwrap();

    assert_eq!(record, ledger.to_teardown_record());
    assert_eq!(record.roles[0].role_name, "HopExecutionRole");
    assert_eq!(record.work_units[0].unit_name, "hop-unit-1");
    assert_eq!(record.work_units[0].state, UnitState::Deploying);
    assert_eq!(record.principals[1].hop, 2);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("secret"));
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    for key in ["roles", "work_units", "principals"] {
        assert!(value[key].is_array(), "missing {key}");
    }
}

#[tokio::test(start_paused = true)]
async fn audit_text_lists_name_and_key_per_hop() {
    let identity = InMemoryIdentity::new();
    let config = chain_config(3);
    let mut ledger = ResourceLedger::new();
    EscalationChain::new(local_executor(&identity, &config), seed_credentials(), 3)
        .run(&mut ledger)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.txt");
    ledger.write_audit_text(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    for (line, principal) in lines.iter().zip(ledger.principals()) {
        let key = &principal.credentials.as_ref().unwrap().access_key_id;
        assert_eq!(*line, format!("{},{}", principal.name, key));
    }
}

#[tokio::test(start_paused = true)]
async fn teardown_plan_orders_principals_units_roles() {
    let ledger = two_hop_remote_ledger().await;
    let plan = ledger.to_teardown_record().plan();
    let names: Vec<String> = ledger.principals().map(|p| p.name.clone()).collect();
    let policy = test_policy().reference().to_string();

    let expected = vec![
        TeardownStep::DetachPrincipalPolicy {
            principal: names[1].clone(),
            kind: PrincipalKind::User,
            policy: policy.clone(),
        },
        TeardownStep::DeleteCredentials {
            principal: names[1].clone(),
            access_key_id: "AKIA0002".into(),
        },
        TeardownStep::DeletePrincipal {
            principal: names[1].clone(),
            kind: PrincipalKind::User,
        },
        TeardownStep::DetachPrincipalPolicy {
            principal: names[0].clone(),
            kind: PrincipalKind::User,
            policy: policy.clone(),
        },
        TeardownStep::DeleteCredentials {
            principal: names[0].clone(),
            access_key_id: "AKIA0001".into(),
        },
        TeardownStep::DeletePrincipal {
            principal: names[0].clone(),
            kind: PrincipalKind::User,
        },
        TeardownStep::DeleteWorkUnit {
            unit: "hop-unit-1".into(),
        },
        TeardownStep::DeleteWorkUnit {
            unit: "hop-unit-2".into(),
        },
        TeardownStep::DetachRolePolicy {
            role: "HopExecutionRole".into(),
            policy,
        },
        TeardownStep::DeleteRole {
            role: "HopExecutionRole".into(),
        },
    ];
    assert_eq!(plan, expected);
}

#[test]
fn plan_skips_credentials_never_issued() {
    let record: TeardownRecord = serde_json::from_value(serde_json::json!({
        "principals": [
            { "name": "nested_user_1", "kind": "user", "hop": 1 }
        ]
    }))
    .unwrap();

    let plan = record.plan();
    assert_eq!(
        plan,
        vec![TeardownStep::DeletePrincipal {
            principal: "nested_user_1".into(),
            kind: PrincipalKind::User,
        }]
    );
    assert_eq!(record.audit_text(), "nested_user_1,\n");
}
