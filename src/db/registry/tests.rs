use super::*;
use crate::testing::{descriptor, CountingConnector, MemoryWarehouse};

fn registry_with(connector: Arc<CountingConnector>) -> ConnectionRegistry {
    ConnectionRegistry::new(connector, Duration::from_secs(5))
}

#[tokio::test]
async fn test_concurrent_acquire_creates_one_handle() {
    let connector = Arc::new(
        CountingConnector::new(Arc::new(MemoryWarehouse::new()))
            .with_delay(Duration::from_millis(20)),
    );
    let registry = Arc::new(registry_with(connector.clone()));
    let target = descriptor("ch-1");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        let target = target.clone();
        tasks.push(tokio::spawn(async move { registry.acquire(&target).await }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(connector.connects(), 1);
    assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_distinct_descriptors_get_distinct_entries() {
    let connector = Arc::new(CountingConnector::new(Arc::new(MemoryWarehouse::new())));
    let registry = registry_with(connector.clone());

    registry.acquire(&descriptor("ch-1")).await.unwrap();
    registry.acquire(&descriptor("ch-2")).await.unwrap();
    registry.acquire(&descriptor("ch-1")).await.unwrap();

    assert_eq!(connector.connects(), 2);
    assert_eq!(registry.len().await, 2);
}

#[tokio::test]
async fn test_failed_connect_is_not_cached() {
    let connector = Arc::new(
        CountingConnector::new(Arc::new(MemoryWarehouse::new())).failing_first(1),
    );
    let registry = registry_with(connector.clone());
    let target = descriptor("ch-1");

    let err = registry.acquire(&target).await.err().unwrap();
    assert_eq!(err.kind(), "connection");
    assert!(registry.is_empty().await);

    registry.acquire(&target).await.unwrap();
    assert_eq!(connector.connects(), 2);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_ping_failure_surfaces_connection_error() {
    let warehouse = MemoryWarehouse::new()
        .failing_ping(TransferError::connection_fatal("Authentication failed"));
    let connector = Arc::new(CountingConnector::new(Arc::new(warehouse)));
    let registry = registry_with(connector);

    let err = registry.acquire(&descriptor("ch-1")).await.err().unwrap();
    assert!(matches!(err, TransferError::Connection { retryable: false, .. }));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_slow_connect_times_out_as_retryable() {
    let connector = Arc::new(
        CountingConnector::new(Arc::new(MemoryWarehouse::new()))
            .with_delay(Duration::from_millis(500)),
    );
    let registry = ConnectionRegistry::new(connector, Duration::from_millis(20));

    let err = registry.acquire(&descriptor("ch-1")).await.err().unwrap();
    assert!(err.is_retryable());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_release_is_idempotent_and_closes() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let connector = Arc::new(CountingConnector::new(warehouse.clone()));
    let registry = registry_with(connector.clone());
    let target = descriptor("ch-1");

    registry.acquire(&target).await.unwrap();
    registry.release(&target).await;
    assert!(warehouse.is_closed());
    assert!(registry.is_empty().await);

    // second release has nothing to do
    registry.release(&target).await;

    registry.acquire(&target).await.unwrap();
    assert_eq!(connector.connects(), 2);
}

#[tokio::test]
async fn test_release_all_clears_every_entry() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let registry = registry_with(Arc::new(CountingConnector::new(warehouse.clone())));

    registry.acquire(&descriptor("ch-1")).await.unwrap();
    registry.acquire(&descriptor("ch-2")).await.unwrap();
    registry.release_all().await;

    assert!(registry.is_empty().await);
    assert!(warehouse.is_closed());
}

#[tokio::test]
async fn test_release_during_creation_closes_the_late_handle() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let connector = Arc::new(
        CountingConnector::new(warehouse.clone()).with_delay(Duration::from_millis(100)),
    );
    let registry = Arc::new(registry_with(connector));
    let target = descriptor("ch-1");

    let pending = {
        let registry = registry.clone();
        let target = target.clone();
        tokio::spawn(async move { registry.acquire(&target).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    registry.release_all().await;

    let err = pending.await.unwrap().err().unwrap();
    assert!(err.is_retryable());
    assert!(warehouse.is_closed());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_checkout_reports_creation_once() {
    let connector = Arc::new(CountingConnector::new(Arc::new(MemoryWarehouse::new())));
    let registry = registry_with(connector);
    let target = descriptor("ch-1");

    let (_, created) = registry.checkout(&target).await.unwrap();
    assert!(created);
    let (_, created) = registry.checkout(&target).await.unwrap();
    assert!(!created);
}
