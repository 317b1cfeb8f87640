use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::hal::{KvValue, WifiCredentials};
use crate::storage::WIFI_NAMESPACE;
use crate::test_support::{fast_config, Rig};
use crate::worker::WorkerKind;
use crate::workers::maintenance::{MaintenanceWorker, StorageRequest};

fn greenhouse() -> WifiCredentials {
    WifiCredentials {
        ssid: "greenhouse".to_string(),
        pass: "s3cret".to_string(),
    }
}

#[tokio::test]
async fn staged_credentials_become_durable_on_flush() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let (_tx, rx) = mpsc::channel(1);
    let mut worker = MaintenanceWorker::new(ctx, rx);

    // Act
    worker.handle(StorageRequest::SaveCredentials(greenhouse()));
    let staged_only = rig.store.committed().is_empty();
    let flushed = worker.flush();

    // Assert
    assert!(staged_only);
    assert!(flushed);
    assert!(!worker.is_dirty());
    assert_eq!(
        rig.store.committed()[WIFI_NAMESPACE]["ssid"],
        KvValue::Text("greenhouse".to_string())
    );
}

#[tokio::test]
async fn clean_store_is_not_committed() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let (_tx, rx) = mpsc::channel(1);
    let mut worker = MaintenanceWorker::new(ctx, rx);

    // Act
    let flushed = worker.flush();

    // Assert
    assert!(!flushed);
    assert_eq!(worker.commits(), 0);
    assert!(worker.open().is_ok());
}

#[tokio::test(start_paused = true)]
async fn running_worker_commits_queued_requests() {
    // Arrange
    let rig = Rig::new();
    let (ctx, mut parts) = rig.build(fast_config());
    let requests = parts.storage_requests.take().expect("storage inbox");
    let worker = MaintenanceWorker::new(ctx.clone(), requests);
    let task = tokio::spawn(worker.run(ctx.registry.register(WorkerKind::StorageMaintenance)));

    // Act
    ctx.storage_requests
        .send(StorageRequest::SaveCredentials(greenhouse()))
        .await
        .expect("inbox open");
    sleep(Duration::from_secs(2)).await;

    // Assert
    assert_eq!(
        rig.store.committed()[WIFI_NAMESPACE]["pass"],
        KvValue::Text("s3cret".to_string())
    );
    task.abort();
}
