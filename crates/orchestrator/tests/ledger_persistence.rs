#![forbid(unsafe_code)]

use orchestrator::clock::{FixedClock, SystemClock};
use orchestrator::domain::{ContainmentState, EnforcementHandle, name_size_signature};
use orchestrator::ledger::{ContainmentLedger, TransitionOutcome};
use orchestrator::persistence::SqliteLedgerStore;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

async fn open(path: &Path) -> ContainmentLedger {
    let store = SqliteLedgerStore::open(path).await.unwrap();
    ContainmentLedger::new(Box::new(store), Box::new(SystemClock))
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("state/ledger.db");
    let signature = name_size_signature("sample.bin", 1024);
    let handle = EnforcementHandle::new("virusguard-block-a955e40c7835ec35");

    let ledger = open(&db).await;
    ledger
        .transition_to_blocked(signature, handle.clone(), "container started")
        .await
        .unwrap();
    ledger.close().await;

    let reopened = open(&db).await;
    let record = reopened.lookup(&signature).await.unwrap().unwrap();
    assert_eq!(record.state, ContainmentState::Blocked);
    assert_eq!(record.handle, Some(handle));
    assert_eq!(record.diagnostic, "container started");

    reopened
        .transition_to_unblocked(signature, "container removed")
        .await
        .unwrap();
    reopened.close().await;

    let third = open(&db).await;
    let history = third.history(&signature).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].to, ContainmentState::Unblocked);
    assert_eq!(third.records().await.unwrap().len(), 1);
    third.close().await;
}

#[tokio::test]
async fn timestamps_come_from_the_clock() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("ledger.db");
    let at = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
    let signature = name_size_signature("sample.bin", 1024);

    let store = SqliteLedgerStore::open(&db).await.unwrap();
    let ledger = ContainmentLedger::new(Box::new(store), Box::new(FixedClock(at)));
    ledger
        .transition_to_blocked(signature, EnforcementHandle::new("vg-block-1"), "")
        .await
        .unwrap();

    let record = ledger.lookup(&signature).await.unwrap().unwrap();
    assert_eq!(record.updated_at, at);
    assert_eq!(ledger.history(&signature).await.unwrap()[0].at, at);
    ledger.close().await;
}

/// Two ledgers over one database file stand in for two processes: their
/// in-memory leases do not see each other, so the store decides.
#[tokio::test]
async fn racing_ledgers_record_one_block() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("ledger.db");
    let signature = name_size_signature("sample.bin", 1024);
    let handle = EnforcementHandle::new("virusguard-block-a955e40c7835ec35");

    let first = open(&db).await;
    let second = open(&db).await;

    let mut lease_a = first.acquire(signature).await;
    let mut lease_b = second.acquire(signature).await;
    assert_eq!(lease_a.state().await.unwrap(), ContainmentState::Unblocked);
    assert_eq!(lease_b.state().await.unwrap(), ContainmentState::Unblocked);

    let a = lease_a
        .transition_to_blocked(handle.clone(), "a")
        .await
        .unwrap();
    let b = lease_b.transition_to_blocked(handle, "b").await.unwrap();
    drop(lease_a);
    drop(lease_b);

    assert!(a.is_applied());
    assert_eq!(b, TransitionOutcome::AlreadyInState(ContainmentState::Blocked));
    assert_eq!(first.history(&signature).await.unwrap().len(), 1);
    assert_eq!(
        second.lookup(&signature).await.unwrap().unwrap().diagnostic,
        "a"
    );

    first.close().await;
    second.close().await;
}
