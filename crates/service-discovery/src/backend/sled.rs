//! Sled database backend for service discovery

use super::{ServiceDiscoveryBackend, ensure_unregistered, new_registration, registration_of};
use crate::{
    error::{Error, Result},
    record::{JsonObject, Record},
};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, error, info};

/// Configuration key for the database directory
pub const PATH_KEY: &str = "path";

/// Sled-based discovery backend.
///
/// Records are stored as JSON under their registration id. Several
/// discovery instances in one process can share it through the same `Arc`.
pub struct SledBackend {
    /// Database instance
    db: sled::Db,
    /// Records tree
    records: sled::Tree,
}

impl SledBackend {
    /// Name used for selection in the backend table
    pub const NAME: &'static str = "sled";

    /// Open a persistent backend at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure the directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening sled discovery backend at {:?}", path);
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// Create a temporary backend, removed when dropped
    pub fn temporary() -> Result<Self> {
        info!("Creating temporary sled discovery backend");
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    /// Build from backend configuration: `path` or a temporary database
    pub fn from_config(config: &JsonObject) -> Result<Self> {
        match config.get(PATH_KEY) {
            Some(Value::String(path)) => Self::open(path),
            Some(other) => Err(Error::InvalidConfiguration(format!(
                "'{}' must be a string, got {}",
                PATH_KEY, other
            ))),
            None => Self::temporary(),
        }
    }

    fn with_db(db: sled::Db) -> Result<Self> {
        let records = db.open_tree("records")?;
        Ok(Self { db, records })
    }

    async fn write(&self, registration: &str, record: &Record) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        self.records.insert(registration.as_bytes(), value)?;
        self.records.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl ServiceDiscoveryBackend for SledBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn store(&self, mut record: Record) -> Result<Record> {
        ensure_unregistered(&record)?;

        let registration = new_registration();
        debug!("Storing record {} as {}", record.name, registration);
        record.registration = Some(registration.clone());

        self.write(&registration, &record).await?;
        Ok(record)
    }

    async fn remove(&self, registration: &str) -> Result<Record> {
        debug!("Removing record: {}", registration);

        let bytes = self
            .records
            .remove(registration.as_bytes())?
            .ok_or_else(|| Error::NotFound(registration.to_string()))?;
        self.records.flush_async().await?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let registration = registration_of(record)?;
        debug!("Updating record: {}", registration);

        // Only replace a present value, so a concurrent remove is never undone
        let value = serde_json::to_vec(record)?;
        let previous = self
            .records
            .fetch_and_update(registration.as_bytes(), |current| {
                current.map(|_| value.clone())
            })?;
        if previous.is_none() {
            return Err(Error::NotFound(registration.to_string()));
        }
        self.records.flush_async().await?;
        Ok(())
    }

    async fn get_record(&self, registration: &str) -> Result<Option<Record>> {
        match self.records.get(registration.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_records(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for result in self.records.iter() {
            let (_, value) = result?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

impl Drop for SledBackend {
    fn drop(&mut self) {
        // Attempt to flush on drop
        if let Err(e) = self.db.flush() {
            error!("Failed to flush discovery backend on drop: {}", e);
        }
    }
}
