//! In-memory backend for service discovery

use super::{ServiceDiscoveryBackend, ensure_unregistered, new_registration, registration_of};
use crate::{
    error::{Error, Result},
    record::Record,
};
use async_trait::async_trait;
use futures::lock::Mutex;
use indexmap::IndexMap;
use tracing::debug;

/// Process-local backend; enumeration order is publication order
pub struct MemoryBackend {
    /// Records by registration id
    records: Mutex<IndexMap<String, Record>>,
}

impl MemoryBackend {
    /// Name used for selection in the backend table
    pub const NAME: &'static str = "memory";

    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            records: Mutex::new(IndexMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceDiscoveryBackend for MemoryBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn store(&self, mut record: Record) -> Result<Record> {
        ensure_unregistered(&record)?;

        let registration = new_registration();
        debug!("Storing record {} as {}", record.name, registration);
        record.registration = Some(registration.clone());

        let mut records = self.records.lock().await;
        records.insert(registration, record.clone());
        Ok(record)
    }

    async fn remove(&self, registration: &str) -> Result<Record> {
        let mut records = self.records.lock().await;
        records
            .shift_remove(registration)
            .ok_or_else(|| Error::NotFound(registration.to_string()))
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let registration = registration_of(record)?;

        let mut records = self.records.lock().await;
        match records.get_mut(registration) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound(registration.to_string())),
        }
    }

    async fn get_record(&self, registration: &str) -> Result<Option<Record>> {
        let records = self.records.lock().await;
        Ok(records.get(registration).cloned())
    }

    async fn get_records(&self) -> Result<Vec<Record>> {
        let records = self.records.lock().await;
        Ok(records.values().cloned().collect())
    }
}
