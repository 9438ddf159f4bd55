//! Core service discovery implementation

use crate::{
    backend::{BackendRegistry, ServiceDiscoveryBackend, ensure_unregistered, registration_of},
    bus::EventBus,
    error::{Error, Result},
    export::ServiceExporter,
    filter::RecordFilter,
    import::ServiceImporter,
    options::DiscoveryOptions,
    publisher::ServicePublisher,
    record::{JsonObject, Record, Status},
    reference::ServiceReference,
    types::{ServiceObject, ServiceTypes},
};
use async_channel::Receiver;
use async_trait::async_trait;
use futures::future::join_all;
use futures::lock::Mutex;
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Kind of usage event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    /// A reference was bound
    Bind,
    /// A reference was released
    Release,
}

impl UsageKind {
    fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Bind => "bind",
            UsageKind::Release => "release",
        }
    }
}

/// Service discovery with pluggable backend.
///
/// Publishes, looks up and binds records; broadcasts announcements and usage
/// events on the [`EventBus`]; owns the lifecycle of registered importers and
/// exporters.
pub struct ServiceDiscovery {
    id: String,
    options: DiscoveryOptions,
    backend: Arc<dyn ServiceDiscoveryBackend>,
    types: ServiceTypes,
    bus: EventBus,
    /// Live bindings, in bind order
    bindings: Mutex<IndexMap<Uuid, Arc<ServiceReference>>>,
    importers: Mutex<Vec<Arc<dyn ServiceImporter>>>,
    exporters: Mutex<Vec<Arc<dyn ServiceExporter>>>,
    /// Records unpublished through this instance, most recent last
    retired: Mutex<VecDeque<Record>>,
}

/// Builder for [`ServiceDiscovery`]
pub struct ServiceDiscoveryBuilder {
    options: DiscoveryOptions,
    backend: Option<Arc<dyn ServiceDiscoveryBackend>>,
    backends: BackendRegistry,
    types: ServiceTypes,
    bus: EventBus,
}

impl ServiceDiscoveryBuilder {
    /// Use this backend instead of building one from the options
    pub fn backend(mut self, backend: Arc<dyn ServiceDiscoveryBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Backend table used to build the backend from the options
    pub fn backend_registry(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    /// Service type table used to resolve references
    pub fn service_types(mut self, types: ServiceTypes) -> Self {
        self.types = types;
        self
    }

    /// Bus the announce and usage channels live on
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Build the discovery instance
    pub fn build(self) -> Result<Arc<ServiceDiscovery>> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => self.backends.create(&self.options.backend_configuration)?,
        };

        let discovery = ServiceDiscovery {
            id: Uuid::new_v4().to_string(),
            options: self.options,
            backend,
            types: self.types,
            bus: self.bus,
            bindings: Mutex::new(IndexMap::new()),
            importers: Mutex::new(Vec::new()),
            exporters: Mutex::new(Vec::new()),
            retired: Mutex::new(VecDeque::new()),
        };
        info!(
            "Created service discovery {} ({}) on {} backend",
            discovery.options.name,
            discovery.id,
            discovery.backend.name()
        );
        Ok(Arc::new(discovery))
    }
}

impl ServiceDiscovery {
    /// Builder with default backend table, service types and a private bus
    pub fn builder(options: DiscoveryOptions) -> ServiceDiscoveryBuilder {
        ServiceDiscoveryBuilder {
            options,
            backend: None,
            backends: BackendRegistry::with_defaults(),
            types: ServiceTypes::with_defaults(),
            bus: EventBus::new(),
        }
    }

    /// Create a discovery instance from options alone
    pub fn new(options: DiscoveryOptions) -> Result<Arc<Self>> {
        Self::builder(options).build()
    }

    /// Create a discovery instance on an existing backend
    pub fn with_backend(
        options: DiscoveryOptions,
        backend: Arc<dyn ServiceDiscoveryBackend>,
    ) -> Result<Arc<Self>> {
        Self::builder(options).backend(backend).build()
    }

    /// Identifier of this instance, carried by usage events
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Options this instance was built with
    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Subscribe to an address on this instance's bus
    pub fn subscribe(&self, address: &str) -> Receiver<Value> {
        self.bus.subscribe(address)
    }

    /// Subscribe to record announcements
    pub fn subscribe_announcements(&self) -> Receiver<Value> {
        self.bus.subscribe(&self.options.announce_address)
    }

    /// Subscribe to usage events, if the usage channel is enabled
    pub fn subscribe_usage(&self) -> Option<Receiver<Value>> {
        self.options
            .usage_address
            .as_deref()
            .map(|address| self.bus.subscribe(address))
    }

    /// Publish a record.
    ///
    /// An `UNKNOWN` status becomes `UP`. Exporters and the announce channel
    /// are notified only after the backend stored the record.
    pub async fn publish(&self, mut record: Record) -> Result<Record> {
        ensure_unregistered(&record)?;
        if record.status == Status::Unknown {
            record.status = Status::Up;
        }

        let stored = self.backend.store(record).await?;
        let registration = registration_of(&stored)?.to_string();
        self.forget_retired(&registration).await;
        info!("Published record {} as {}", stored.name, registration);

        for exporter in self.exporters_snapshot().await {
            exporter.on_publish(stored.clone()).await;
        }
        self.announce(stored.without_registration().to_json());

        Ok(stored)
    }

    /// Unpublish a record, returning it with status `DOWN`
    pub async fn unpublish(&self, registration: &str) -> Result<Record> {
        let mut removed = self.backend.remove(registration).await?;
        removed.status = Status::Down;
        info!("Unpublished record {} ({})", removed.name, registration);

        for exporter in self.exporters_snapshot().await {
            exporter.on_unpublish(registration).await;
        }
        self.announce(removed.without_registration().to_json());
        self.retire(removed.clone()).await;

        Ok(removed)
    }

    /// Overwrite a published record, then notify and announce it
    pub async fn update(&self, record: Record) -> Result<Record> {
        let registration = registration_of(&record)?;
        self.backend.update(&record).await?;
        debug!("Updated record {} ({})", record.name, registration);

        for exporter in self.exporters_snapshot().await {
            exporter.on_update(record.clone()).await;
        }
        self.announce(record.to_json());

        Ok(record)
    }

    /// First `UP` record accepted by the filter
    pub async fn get_record(&self, filter: impl Into<RecordFilter>) -> Result<Option<Record>> {
        self.get_record_with(filter, false).await
    }

    /// First record accepted by the filter, optionally in any status
    pub async fn get_record_with(
        &self,
        filter: impl Into<RecordFilter>,
        include_out_of_service: bool,
    ) -> Result<Option<Record>> {
        let filter = filter.into();
        let found = self
            .backend
            .get_records()
            .await?
            .into_iter()
            .find(|record| filter.accepts(record, include_out_of_service));

        match found {
            Some(record) => Ok(Some(record)),
            None if include_out_of_service || filter.names_status() => {
                let retired = self.retired.lock().await;
                Ok(retired
                    .iter()
                    .rev()
                    .find(|record| filter.accepts(record, true))
                    .cloned())
            }
            None => Ok(None),
        }
    }

    /// All `UP` records accepted by the filter, in backend order
    pub async fn get_records(&self, filter: impl Into<RecordFilter>) -> Result<Vec<Record>> {
        self.get_records_with(filter, false).await
    }

    /// All records accepted by the filter, optionally in any status
    pub async fn get_records_with(
        &self,
        filter: impl Into<RecordFilter>,
        include_out_of_service: bool,
    ) -> Result<Vec<Record>> {
        let filter = filter.into();
        let mut records: Vec<Record> = self
            .backend
            .get_records()
            .await?
            .into_iter()
            .filter(|record| filter.accepts(record, include_out_of_service))
            .collect();

        if include_out_of_service || filter.names_status() {
            let retired = self.retired.lock().await;
            records.extend(
                retired
                    .iter()
                    .rev()
                    .filter(|record| filter.accepts(record, true))
                    .cloned(),
            );
        }
        Ok(records)
    }

    /// Record by registration id, whatever its status
    pub async fn get_record_by_registration(&self, registration: &str) -> Result<Option<Record>> {
        self.backend.get_record(registration).await
    }

    /// Like [`get_record`](Self::get_record) but an empty match is an error
    pub async fn lookup(&self, filter: impl Into<RecordFilter>) -> Result<Record> {
        let filter = filter.into();
        self.get_record(filter.clone())
            .await?
            .ok_or_else(|| Error::NoMatchingRecord(format!("{:?}", filter)))
    }

    /// Bind to a record with an empty configuration
    pub async fn get_reference(&self, record: &Record) -> Result<Arc<ServiceReference>> {
        self.get_reference_with_configuration(record, JsonObject::new())
            .await
    }

    /// Bind to a record; the service object is built with `configuration`
    pub async fn get_reference_with_configuration(
        &self,
        record: &Record,
        configuration: JsonObject,
    ) -> Result<Arc<ServiceReference>> {
        let service_type = self.types.resolve(&record.record_type)?;
        let reference = Arc::new(ServiceReference::new(
            record.clone(),
            service_type,
            configuration,
        ));

        self.bindings
            .lock()
            .await
            .insert(reference.id(), reference.clone());
        debug!("Bound reference {} to {}", reference.id(), record.name);
        self.emit_usage(UsageKind::Bind, record);

        Ok(reference)
    }

    /// Release a reference; returns whether it was a live binding
    pub async fn release(&self, reference: &ServiceReference) -> bool {
        let tracked = self
            .bindings
            .lock()
            .await
            .shift_remove(&reference.id())
            .is_some();

        let transitioned = reference.release().await;
        if tracked || transitioned {
            self.emit_usage(UsageKind::Release, reference.record());
        }
        tracked
    }

    /// Snapshot of live bindings
    pub async fn bindings(&self) -> Vec<Arc<ServiceReference>> {
        self.bindings.lock().await.values().cloned().collect()
    }

    /// Look up a record, bind to it and return its service object
    pub async fn get_service(
        &self,
        filter: impl Into<RecordFilter>,
        configuration: JsonObject,
    ) -> Result<ServiceObject> {
        let record = self.lookup(filter).await?;
        let reference = self
            .get_reference_with_configuration(&record, configuration)
            .await?;

        match reference.get().await {
            Ok(object) => Ok(object),
            Err(e) => {
                self.release(&reference).await;
                Err(e)
            }
        }
    }

    /// Release the binding holding `object`; returns whether one was found
    pub async fn release_service_object(&self, object: &ServiceObject) -> bool {
        for reference in self.bindings().await {
            if reference.holds(object).await {
                return self.release(&reference).await;
            }
        }
        false
    }

    /// Start an importer and add it to the active set once it is running
    pub async fn register_service_importer(
        self: &Arc<Self>,
        importer: Arc<dyn ServiceImporter>,
        config: JsonObject,
    ) -> Result<()> {
        let publisher: Arc<dyn ServicePublisher> = self.clone();
        importer.start(publisher, config).await?;

        let mut importers = self.importers.lock().await;
        importers.push(importer);
        info!("Registered service importer ({} active)", importers.len());
        Ok(())
    }

    /// Initialize an exporter and add it to the active set once it is ready
    pub async fn register_service_exporter(
        self: &Arc<Self>,
        exporter: Arc<dyn ServiceExporter>,
        config: JsonObject,
    ) -> Result<()> {
        let publisher: Arc<dyn ServicePublisher> = self.clone();
        exporter.init(publisher, config).await?;

        let mut exporters = self.exporters.lock().await;
        exporters.push(exporter);
        info!("Registered service exporter ({} active)", exporters.len());
        Ok(())
    }

    /// Close importers and exporters, then release every binding
    pub async fn close(&self) {
        info!("Closing service discovery {}", self.options.name);

        let importers = std::mem::take(&mut *self.importers.lock().await);
        let exporters = std::mem::take(&mut *self.exporters.lock().await);

        let closing_importers = join_all(importers.iter().map(|importer| importer.close()));
        let closing_exporters = join_all(exporters.iter().map(|exporter| exporter.close()));
        let (imported, exported) = futures::join!(closing_importers, closing_exporters);

        for e in imported.into_iter().filter_map(|r| r.err()) {
            error!("Failed to close service importer: {}", e);
        }
        for e in exported.into_iter().filter_map(|r| r.err()) {
            error!("Failed to close service exporter: {}", e);
        }

        let bindings: Vec<Arc<ServiceReference>> = self
            .bindings
            .lock()
            .await
            .drain(..)
            .map(|(_, reference)| reference)
            .collect();
        for reference in bindings {
            reference.release().await;
            self.emit_usage(UsageKind::Release, reference.record());
        }
    }

    async fn exporters_snapshot(&self) -> Vec<Arc<dyn ServiceExporter>> {
        self.exporters.lock().await.clone()
    }

    fn announce(&self, envelope: Value) {
        self.bus.publish(&self.options.announce_address, envelope);
    }

    fn emit_usage(&self, kind: UsageKind, record: &Record) {
        if let Some(address) = &self.options.usage_address {
            self.bus.publish(
                address,
                json!({
                    "type": kind.as_str(),
                    "record": record.to_json(),
                    "id": self.id,
                }),
            );
        }
    }

    async fn retire(&self, record: Record) {
        if self.options.retired_capacity == 0 {
            return;
        }
        let mut retired = self.retired.lock().await;
        retired.push_back(record);
        while retired.len() > self.options.retired_capacity {
            retired.pop_front();
        }
    }

    async fn forget_retired(&self, registration: &str) {
        let mut retired = self.retired.lock().await;
        retired.retain(|record| record.registration.as_deref() != Some(registration));
    }
}

#[async_trait]
impl ServicePublisher for ServiceDiscovery {
    async fn publish(&self, record: Record) -> Result<Record> {
        ServiceDiscovery::publish(self, record).await
    }

    async fn unpublish(&self, registration: &str) -> Result<Record> {
        ServiceDiscovery::unpublish(self, registration).await
    }

    async fn update(&self, record: Record) -> Result<Record> {
        ServiceDiscovery::update(self, record).await
    }
}
