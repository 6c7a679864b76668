#![forbid(unsafe_code)]
#![cfg(target_os = "linux")]

use config::{Config, Mechanism};
use orchestrator::clock::SystemClock;
use orchestrator::domain::ContainmentState;
use orchestrator::enforcement;
use orchestrator::persistence::MemoryLedgerStore;
use orchestrator::{BlockResult, ContainmentController, Services, UnblockResult};
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
async fn terminate_mechanism_kills_and_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dropper.bin");
    std::fs::write(&path, b"payload").unwrap();

    let mut child = tokio::process::Command::new("tail")
        .arg("-f")
        .arg(&path)
        .kill_on_drop(true)
        .spawn()
        .expect("spawn tail");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut config = Config::default();
    config.enforcement.mechanism = Mechanism::Terminate;
    let controller = ContainmentController::new(
        &config,
        Services {
            enforcement: enforcement::from_config(&config),
            store: Box::new(MemoryLedgerStore::new()),
            clock: Box::new(SystemClock),
        },
    );

    let blocked = controller.block(&path).await.unwrap();
    assert!(
        matches!(blocked, BlockResult::Blocked { ref diagnostic, .. } if diagnostic.starts_with("terminated 1 process(es)")),
        "unexpected block result {blocked:?}"
    );
    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("child reaped")
        .unwrap();
    assert!(!status.success());

    let unblocked = controller.unblock(&path).await.unwrap();
    assert!(matches!(unblocked, UnblockResult::Unblocked { .. }));
    let report = controller.status(&path).await.unwrap();
    assert_eq!(
        report.record.map(|r| r.state),
        Some(ContainmentState::Unblocked)
    );
}
