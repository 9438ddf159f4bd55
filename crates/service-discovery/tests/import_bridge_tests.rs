//! Import bridge bootstrap, incremental reconciliation and resync

mod common;

use common::{
    config, eventually, record_names, service, smol_spawner, wait_for_names, wait_for_watchers,
};
use serde_json::{Value, json};
use service_discovery::{
    DiscoveryOptions, Error, ExternalService, ImportBridge, ManualSource, ServiceDiscovery,
    ServiceImporter, ServicePublisher,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Bridge = ImportBridge<ManualSource<ExternalService>>;

fn fast() -> serde_json::Map<String, Value> {
    config(json!({"debounce_ms": 20, "retry_delay_ms": 50}))
}

async fn start(
    source: &Arc<ManualSource<ExternalService>>,
    settings: serde_json::Map<String, Value>,
) -> (Arc<ServiceDiscovery>, Arc<Bridge>) {
    let discovery = ServiceDiscovery::new(DiscoveryOptions::default()).unwrap();
    let bridge = Arc::new(ImportBridge::new("catalog", source.clone(), smol_spawner()));
    discovery
        .register_service_importer(bridge.clone(), settings)
        .await
        .unwrap();
    (discovery, bridge)
}

async fn registrations(discovery: &ServiceDiscovery) -> Vec<String> {
    let mut ids: Vec<String> = discovery
        .get_records(service_discovery::RecordFilter::all())
        .await
        .unwrap()
        .into_iter()
        .filter_map(|record| record.registration)
        .collect();
    ids.sort();
    ids
}

#[smol_potat::test]
async fn test_bootstrap_publishes_listing() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    source.insert(service("b", 6379));

    let (discovery, bridge) = start(&source, fast()).await;

    // Bootstrap completes before registration returns
    assert_eq!(record_names(&discovery).await, vec!["a", "b"]);
    let keys: Vec<String> = bridge
        .imported_keys()
        .await
        .iter()
        .map(|key| key.to_string())
        .collect();
    assert_eq!(
        keys,
        vec!["uid-a@http://10.0.0.1:80/", "uid-b@redis://10.0.0.1:6379"]
    );

    let redis = discovery
        .lookup(json!({"name": "b"}))
        .await
        .unwrap();
    assert_eq!(redis.record_type, "redis");
    assert_eq!(redis.metadata["service.uid"], "uid-b");
    assert!(bridge.is_running().await);

    discovery.close().await;
}

#[smol_potat::test]
async fn test_bootstrap_failure_is_fatal() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    source.fail_next_lists(1);

    let discovery = ServiceDiscovery::new(DiscoveryOptions::default()).unwrap();
    let bridge = Arc::new(ImportBridge::new("catalog", source.clone(), smol_spawner()));
    let result = discovery
        .register_service_importer(bridge.clone(), fast())
        .await;

    assert!(matches!(result, Err(Error::SourceUnavailable(_))));
    assert!(!bridge.is_running().await);
    assert!(record_names(&discovery).await.is_empty());
}

#[smol_potat::test]
async fn test_invalid_bridge_config() {
    let source = Arc::new(ManualSource::<ExternalService>::new());
    let discovery = ServiceDiscovery::new(DiscoveryOptions::default()).unwrap();
    let bridge = Arc::new(ImportBridge::new("catalog", source, smol_spawner()));

    let result = discovery
        .register_service_importer(bridge, config(json!({"debounce_ms": -1})))
        .await;
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
}

#[smol_potat::test]
async fn test_second_start_is_rejected() {
    let source = Arc::new(ManualSource::<ExternalService>::new());
    let (discovery, bridge) = start(&source, fast()).await;

    let publisher: Arc<dyn ServicePublisher> = discovery.clone();
    assert!(bridge.start(publisher, fast()).await.is_err());

    discovery.close().await;
    assert!(!bridge.is_running().await);
}

#[smol_potat::test]
async fn test_incremental_changes() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    let (discovery, bridge) = start(&source, fast()).await;
    wait_for_watchers(&source, 1).await;

    source.insert(service("b", 80));
    wait_for_names(&discovery, &["a", "b"]).await;

    source.modify(service("a", 80).with_label("tier", "edge"));
    let d = &discovery;
    eventually("label on a", || async move {
        d.get_record(json!({"name": "a", "tier": "edge"}))
            .await
            .unwrap()
            .is_some()
    })
    .await;
    assert_eq!(record_names(&discovery).await, vec!["a", "b"]);

    source.remove("uid-b");
    wait_for_names(&discovery, &["a"]).await;
    assert_eq!(bridge.imported_keys().await.len(), 1);

    discovery.close().await;
}

#[smol_potat::test]
async fn test_endpoint_change_replaces_record() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    let (discovery, bridge) = start(&source, fast()).await;
    wait_for_watchers(&source, 1).await;

    source.modify(service("a", 8080));
    let b = &bridge;
    eventually("new endpoint", || async move {
        b.imported_keys()
            .await
            .iter()
            .any(|key| key.as_str() == "uid-a@http://10.0.0.1:8080/")
    })
    .await;

    let records = discovery
        .get_records(json!({"name": "a"}))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].endpoint(), Some("http://10.0.0.1:8080/"));
    assert_eq!(bridge.imported_keys().await.len(), 1);

    discovery.close().await;
}

#[smol_potat::test]
async fn test_added_then_deleted_in_one_window() {
    let source = Arc::new(ManualSource::new());
    let (discovery, _bridge) =
        start(&source, config(json!({"debounce_ms": 100, "retry_delay_ms": 50}))).await;
    wait_for_watchers(&source, 1).await;
    let announcements = discovery.subscribe_announcements();

    source.insert(service("c", 80));
    source.remove("uid-c");
    source.insert(service("d", 80));
    wait_for_names(&discovery, &["d"]).await;

    let announced: Vec<Value> = std::iter::from_fn(|| announcements.try_recv().ok()).collect();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0]["name"], "d");

    discovery.close().await;
}

#[smol_potat::test]
async fn test_resync_after_watch_failure() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    source.insert(service("b", 80));
    let (discovery, bridge) =
        start(&source, config(json!({"debounce_ms": 20, "retry_delay_ms": 200}))).await;
    wait_for_watchers(&source, 1).await;

    // Changes made while no watch is open are only seen by the relisting
    source.fail_watch();
    source.fail_next_lists(2);
    source.remove("uid-a");
    source.insert(service("c", 80));

    wait_for_names(&discovery, &["b", "c"]).await;
    let mut keys: Vec<String> = bridge
        .imported_keys()
        .await
        .iter()
        .map(|key| key.to_string())
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec!["uid-b@http://10.0.0.1:80/", "uid-c@http://10.0.0.1:80/"]
    );

    // The watch reopens after the resync
    wait_for_watchers(&source, 1).await;
    source.insert(service("e", 80));
    wait_for_names(&discovery, &["b", "c", "e"]).await;

    discovery.close().await;
}

#[smol_potat::test]
async fn test_resync_keeps_unchanged_records() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    source.insert(service("b", 80));
    let (discovery, _bridge) = start(&source, fast()).await;
    wait_for_watchers(&source, 1).await;
    let before = registrations(&discovery).await;

    source.end_watches();
    wait_for_watchers(&source, 1).await;

    assert_eq!(registrations(&discovery).await, before);
    discovery.close().await;
}

#[smol_potat::test]
async fn test_close_unpublishes_by_default() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    let (discovery, bridge) = start(&source, fast()).await;

    discovery.close().await;
    assert!(record_names(&discovery).await.is_empty());
    assert!(bridge.imported_keys().await.is_empty());
    assert!(!bridge.is_running().await);
}

#[smol_potat::test]
async fn test_close_can_keep_records() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    let (discovery, bridge) = start(
        &source,
        config(json!({"debounce_ms": 20, "unpublish_on_close": false})),
    )
    .await;

    discovery.close().await;
    assert_eq!(record_names(&discovery).await, vec!["a"]);
    assert_eq!(bridge.imported_keys().await.len(), 1);

    // Nothing is applied once stopped
    source.insert(service("late", 80));
    smol::Timer::after(Duration::from_millis(100)).await;
    assert_eq!(record_names(&discovery).await, vec!["a"]);
}

#[smol_potat::test]
async fn test_close_discards_pending_window() {
    let source = Arc::new(ManualSource::new());
    source.insert(service("a", 80));
    let (discovery, bridge) = start(
        &source,
        config(json!({"debounce_ms": 5000, "unpublish_on_close": false})),
    )
    .await;
    wait_for_watchers(&source, 1).await;
    let announcements = discovery.subscribe_announcements();

    source.insert(service("late", 80));
    source.remove("uid-a");
    smol::Timer::after(Duration::from_millis(50)).await;

    // Closing does not wait for the window or apply its batch
    let started = Instant::now();
    discovery.close().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!bridge.is_running().await);

    smol::Timer::after(Duration::from_millis(100)).await;
    assert_eq!(record_names(&discovery).await, vec!["a"]);
    assert!(announcements.try_recv().is_err());
    let keys: Vec<String> = bridge
        .imported_keys()
        .await
        .iter()
        .map(|key| key.to_string())
        .collect();
    assert_eq!(keys, vec!["uid-a@http://10.0.0.1:80/"]);
}
