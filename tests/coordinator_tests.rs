//! Wallet Mutation Coordinator Tests
//!
//! - Amount validation before any ledger call
//! - Per-wallet serialization, cross-wallet parallelism
//! - Post-confirmation balance reads
//! - Error paths: rejection, insufficient balance, timeouts
//! - Idempotency keys


use std::sync::Arc;
use std::time::Duration;

use bmt_gateway::ledger::sandbox::MAX_ACCOUNT_BALANCE;
use bmt_gateway::{
    CoordinatorConfig, LedgerError, MutationError, MutationKind, MutationRequest, OperationTracker, SandboxLedger,
    TokenContract,
};
use test_helpers::*;

// ============================================================================
// VALIDATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_nonpositive_amounts_make_no_ledger_calls() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);

    for amount in [0, -1, -2300, i64::MIN] {
        let credit = coordinator.credit(&alice, amount).await;
        assert!(matches!(credit, Err(MutationError::Validation(_))), "credit {} should fail", amount);

        let debit = coordinator.debit(&alice, amount).await;
        assert!(matches!(debit, Err(MutationError::Validation(_))), "debit {} should fail", amount);
    }

    assert_eq!(sandbox.submission_count(), 0);
    assert_eq!(sandbox.status_poll_count(), 0);
    assert_eq!(coordinator.active_wallets(), 0);
}

// ============================================================================
// SERIALIZATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_same_wallet_mutations_never_overlap() {
    let (recording, coordinator) = create_recording_coordinator(Duration::from_millis(300));
    let alice = wallet(ALICE);

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let coordinator = Arc::clone(&coordinator);
        let alice = alice.clone();
        tasks.push(tokio::spawn(async move { coordinator.credit(&alice, 100).await }));
    }

    let mut balances = Vec::new();
    for task in tasks {
        balances.push(task.await.unwrap().unwrap().amount);
    }
    balances.sort_unstable();

    assert_eq!(recording.max_per_wallet(), 1, "two mutations on one wallet were in flight together");
    assert_eq!(balances, vec![100, 200, 300, 400, 500]);
    assert_eq!(recording.submissions().len(), 5);
    assert_eq!(coordinator.active_wallets(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_different_wallets_run_in_parallel() {
    let (recording, coordinator) = create_recording_coordinator(Duration::from_millis(300));

    let a = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.credit(&wallet(ALICE), 100).await })
    };
    let b = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.credit(&wallet(BOB), 50).await })
    };

    assert_eq!(a.await.unwrap().unwrap().amount, 100);
    assert_eq!(b.await.unwrap().unwrap().amount, 50);
    assert_eq!(recording.max_total(), 2, "mutations on different wallets were serialized");
    assert_eq!(recording.max_per_wallet(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reads_are_not_blocked_by_mutations() {
    let (recording, coordinator) = create_recording_coordinator(Duration::from_secs(2));
    let alice = wallet(ALICE);

    let mutation = {
        let coordinator = Arc::clone(&coordinator);
        let alice = alice.clone();
        tokio::spawn(async move { coordinator.credit(&alice, 100).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the credit is still sitting in submission
    assert_eq!(coordinator.balance(&alice).await.unwrap().amount, 0);
    assert_eq!(coordinator.active_wallets(), 1);

    assert_eq!(mutation.await.unwrap().unwrap().amount, 100);
    assert_eq!(recording.submissions(), vec![ALICE.to_string()]);
}

// ============================================================================
// BALANCES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fresh_contract_reads() {
    let (_sandbox, coordinator) = create_sandbox_coordinator();

    assert_eq!(coordinator.token_supply().await.unwrap(), 0);
    let snapshot = coordinator.balance(&wallet(BOB)).await.unwrap();
    assert_eq!(snapshot.amount, 0);
    assert_eq!(snapshot.wallet_address.as_str(), BOB);
}

#[tokio::test(start_paused = true)]
async fn test_credit_returns_post_confirmation_balance() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    sandbox.seed_balance(ALICE, 250);

    let before = coordinator.balance(&alice).await.unwrap().amount;
    let after = coordinator.credit(&alice, 100).await.unwrap();

    assert_eq!(after.amount, before + 100);
    assert_eq!(coordinator.token_supply().await.unwrap(), 350);
    assert_eq!(sandbox.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reward_and_spend_use_policy_amounts() {
    let (_sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);

    assert_eq!(coordinator.reward(&alice).await.unwrap().amount, 2300);
    assert_eq!(coordinator.spend(&alice).await.unwrap().amount, 2100);
    assert_eq!(coordinator.token_supply().await.unwrap(), 2100);
}

#[tokio::test(start_paused = true)]
async fn test_reward_is_capped_by_contract() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    sandbox.seed_balance(ALICE, 9_000);

    let snapshot = coordinator.reward(&alice).await.unwrap();
    assert_eq!(snapshot.amount, MAX_ACCOUNT_BALANCE);
    assert_eq!(coordinator.token_supply().await.unwrap(), MAX_ACCOUNT_BALANCE);
}

// ============================================================================
// ERROR PATHS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_submit_skips_confirmation_and_releases_lock() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    sandbox.fail_next_submit(LedgerError::Rejected("BMT_NotAdmin".to_string()));

    let err = coordinator.credit(&alice, 10).await.unwrap_err();
    assert_eq!(err, MutationError::Ledger(LedgerError::Rejected("BMT_NotAdmin".to_string())));
    assert_eq!(sandbox.status_poll_count(), 0);
    assert_eq!(coordinator.active_wallets(), 0);

    // the wallet is usable again
    assert_eq!(coordinator.credit(&alice, 10).await.unwrap().amount, 10);
}

#[tokio::test(start_paused = true)]
async fn test_debit_precheck_refuses_overdraw_without_broadcast() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    sandbox.seed_balance(ALICE, 50);

    let err = coordinator.debit(&alice, 100).await.unwrap_err();
    assert_eq!(err, MutationError::InsufficientBalance { available: 50, requested: 100 });
    assert_eq!(sandbox.submission_count(), 0);
    assert_eq!(coordinator.active_wallets(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overdraw_without_precheck_is_rejected_by_contract() {
    let sandbox = Arc::new(SandboxLedger::new(BLOCK_INTERVAL));
    let config = CoordinatorConfig { debit_precheck: false, ..CoordinatorConfig::default() };
    let coordinator = coordinator_over(sandbox.clone(), config);
    sandbox.seed_balance(ALICE, 50);

    let err = coordinator.debit(&wallet(ALICE), 100).await.unwrap_err();
    assert!(matches!(err, MutationError::Ledger(LedgerError::Rejected(ref reason)) if reason.contains("BMT_InsufficientBalance")));
    assert_eq!(coordinator.balance(&wallet(ALICE)).await.unwrap().amount, 50);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_operation_times_out_as_outcome_unknown() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    sandbox.drop_next_operation();

    let err = coordinator.credit(&alice, 10).await.unwrap_err();
    match err {
        MutationError::Ledger(ref inner @ LedgerError::Timeout { .. }) => assert!(inner.outcome_unknown()),
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert_eq!(coordinator.active_wallets(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_wait_is_idempotent() {
    let sandbox = Arc::new(SandboxLedger::new(BLOCK_INTERVAL));
    let contract = TokenContract::new(sandbox.clone());
    let tracker = OperationTracker::new(sandbox.clone(), tracker_config());

    let handle = contract.perform_reward(&wallet(ALICE), bmt_gateway::Amount::new(5).unwrap()).await.unwrap();
    let first = tracker.await_confirmation(&handle, 2).await;
    let second = tracker.await_confirmation(&handle, 2).await;

    assert!(first.is_ok());
    assert_eq!(first, second);
}

// ============================================================================
// IDEMPOTENCY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idempotent_replay_does_not_broadcast_again() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    let request = coordinator.reward_request(&alice).with_idempotency_key(Some("order-17".to_string()));

    let first = coordinator.execute(request.clone()).await.unwrap();
    let second = coordinator.execute(request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(sandbox.submission_count(), 1);
    assert_eq!(coordinator.balance(&alice).await.unwrap().amount, 2300);
}

#[tokio::test(start_paused = true)]
async fn test_reused_key_for_other_request_is_refused() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    let key = Some("order-18".to_string());

    coordinator
        .execute(coordinator.reward_request(&alice).with_idempotency_key(key.clone()))
        .await
        .unwrap();

    let other = MutationRequest::new(alice.clone(), bmt_gateway::Amount::new(1).unwrap(), MutationKind::Debit)
        .with_idempotency_key(key);
    let err = coordinator.execute(other).await.unwrap_err();

    assert!(matches!(err, MutationError::Validation(_)));
    assert_eq!(sandbox.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_is_not_recorded_for_replay() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    let request = coordinator.reward_request(&alice).with_idempotency_key(Some("order-19".to_string()));
    sandbox.fail_next_submit(LedgerError::Connection("node down".to_string()));

    assert!(coordinator.execute(request.clone()).await.is_err());
    assert_eq!(coordinator.execute(request).await.unwrap().amount, 2300);
    assert_eq!(sandbox.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_timeout_waits_on_the_broadcast_operation() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    let request = coordinator.reward_request(&alice).with_idempotency_key(Some("order-20".to_string()));
    sandbox.drop_next_operation();

    let first = coordinator.execute(request.clone()).await.unwrap_err();
    assert!(matches!(first, MutationError::Ledger(LedgerError::Timeout { .. })));

    let second = coordinator.execute(request).await.unwrap_err();
    assert!(matches!(second, MutationError::Ledger(LedgerError::Timeout { .. })));
    assert_eq!(sandbox.submission_count(), 1);
    assert_eq!(coordinator.balance(&alice).await.unwrap().amount, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_timeout_returns_late_confirmation() {
    let (sandbox, coordinator) = create_sandbox_coordinator();
    let alice = wallet(ALICE);
    let request = coordinator.reward_request(&alice).with_idempotency_key(Some("order-21".to_string()));
    sandbox.fail_status_polls(u32::MAX);

    let first = coordinator.execute(request.clone()).await.unwrap_err();
    assert!(matches!(first, MutationError::Ledger(LedgerError::Timeout { .. })));

    // the node is reachable again and the operation has landed
    sandbox.fail_status_polls(0);
    let second = coordinator.execute(request.clone()).await.unwrap();
    assert_eq!(second.amount, 2300);
    assert_eq!(sandbox.submission_count(), 1);

    assert_eq!(coordinator.execute(request).await.unwrap(), second);
    assert_eq!(sandbox.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_operation_frees_its_key() {
    let sandbox = Arc::new(SandboxLedger::new(Duration::from_millis(10)));
    let coordinator = coordinator_over(sandbox.clone(), CoordinatorConfig::default());
    let alice = wallet(ALICE);
    let request = coordinator.reward_request(&alice).with_idempotency_key(Some("order-22".to_string()));
    sandbox.drop_next_operation();

    let err = coordinator.execute(request.clone()).await.unwrap_err();
    assert!(matches!(err, MutationError::Ledger(LedgerError::Rejected(_))));
    assert_eq!(coordinator.balance(&alice).await.unwrap().amount, 0);

    assert_eq!(coordinator.execute(request).await.unwrap().amount, 2300);
    assert_eq!(sandbox.submission_count(), 2);
}
