//! Common test utilities for service discovery integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use service_discovery::{
    Error, ExternalService, ImportableItem, JsonObject, ManualSource, Record, Result,
    ServiceDiscovery, ServiceExporter, ServiceImporter, ServiceObject, ServicePublisher,
    ServiceType, Spawner,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Test timeout for async operations
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Spawner backed by smol's global executor
pub fn smol_spawner() -> Arc<dyn Spawner> {
    Arc::new(|future: BoxFuture<'static, ()>| smol::spawn(future).detach())
}

/// Config map from a JSON literal
pub fn config(value: serde_json::Value) -> JsonObject {
    value.as_object().cloned().unwrap_or_default()
}

/// Catalog entry with one port
pub fn service(name: &str, port: u16) -> ExternalService {
    ExternalService::new(format!("uid-{}", name), name, "10.0.0.1").with_port(port)
}

/// Poll `check` until it holds or the test timeout expires
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        smol::Timer::after(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {}", what);
}

/// Sorted names of the UP records of a discovery instance
pub async fn record_names(discovery: &ServiceDiscovery) -> Vec<String> {
    let mut names: Vec<String> = discovery
        .get_records(service_discovery::RecordFilter::all())
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.name)
        .collect();
    names.sort();
    names
}

/// Wait until exactly these records are UP
pub async fn wait_for_names(discovery: &ServiceDiscovery, expected: &[&str]) {
    eventually(&format!("records {:?}", expected), || async move {
        record_names(discovery).await == expected
    })
    .await;
}

/// Wait until the source has this many open watch streams
pub async fn wait_for_watchers<T: ImportableItem>(source: &ManualSource<T>, count: usize) {
    eventually(&format!("{} open watches", count), || async move {
        source.watcher_count() == count
    })
    .await;
}

/// Service type counting creations and teardowns
#[derive(Clone, Default)]
pub struct CountingType {
    pub created: Arc<AtomicUsize>,
    pub torn_down: Arc<AtomicUsize>,
}

impl CountingType {
    pub const TYPE: &'static str = "counting";

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl ServiceType for CountingType {
    fn name(&self) -> &str {
        Self::TYPE
    }

    fn create(&self, record: &Record, config: &JsonObject) -> Result<ServiceObject> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new((record.name.clone(), config.clone())))
    }

    fn teardown(&self, _object: &ServiceObject) {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
    }
}

/// Exporter recording every notification
#[derive(Default)]
pub struct RecordingExporter {
    pub fail_init: bool,
    pub events: Mutex<Vec<String>>,
    pub closed: AtomicUsize,
}

impl RecordingExporter {
    pub fn failing() -> Self {
        Self {
            fail_init: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ServiceExporter for RecordingExporter {
    async fn init(&self, _publisher: Arc<dyn ServicePublisher>, _config: JsonObject) -> Result<()> {
        if self.fail_init {
            return Err(Error::InvalidConfiguration("exporter refused".to_string()));
        }
        Ok(())
    }

    async fn on_publish(&self, record: Record) {
        self.push(format!("publish:{}", record.name));
    }

    async fn on_update(&self, record: Record) {
        self.push(format!("update:{}", record.name));
    }

    async fn on_unpublish(&self, registration: &str) {
        self.push(format!("unpublish:{}", registration));
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Importer publishing a fixed record on start
#[derive(Default)]
pub struct StubImporter {
    pub fail_start: bool,
    pub fail_close: bool,
    pub closed: AtomicUsize,
}

#[async_trait]
impl ServiceImporter for StubImporter {
    async fn start(&self, publisher: Arc<dyn ServicePublisher>, _config: JsonObject) -> Result<()> {
        if self.fail_start {
            return Err(Error::SourceUnavailable("stub importer".to_string()));
        }
        publisher.publish(Record::new("imported", "unknown")).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(Error::SourceUnavailable("stub importer close".to_string()));
        }
        Ok(())
    }
}
