//! Registry backend implementations

pub mod memory;
pub mod sled;

use crate::{
    error::{Error, Result},
    record::{JsonObject, Record},
};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub use self::memory::MemoryBackend;
pub use self::sled::SledBackend;

/// Configuration key selecting the backend implementation
pub const BACKEND_NAME_KEY: &str = "backend-name";

/// Trait for record storage backends.
///
/// A backend may be shared by several discovery instances (possibly on
/// different nodes) and is expected to give read-your-writes semantics.
#[async_trait]
pub trait ServiceDiscoveryBackend: Send + Sync {
    /// Name of the implementation
    fn name(&self) -> &str;

    /// Store an unpublished record, assigning its registration id
    async fn store(&self, record: Record) -> Result<Record>;

    /// Remove a record, returning it
    async fn remove(&self, registration: &str) -> Result<Record>;

    /// Overwrite a stored record
    async fn update(&self, record: &Record) -> Result<()>;

    /// Get a record by registration id
    async fn get_record(&self, registration: &str) -> Result<Option<Record>>;

    /// All records in the backend's enumeration order
    async fn get_records(&self) -> Result<Vec<Record>>;
}

/// Builds a backend from its configuration map
pub type BackendFactory =
    Arc<dyn Fn(&JsonObject) -> Result<Arc<dyn ServiceDiscoveryBackend>> + Send + Sync>;

/// Table of backend implementations, selected by name at start-up
#[derive(Clone)]
pub struct BackendRegistry {
    factories: IndexMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Empty table
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Table with the built-in `memory` (default) and `sled` backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(MemoryBackend::NAME, |_| {
            Ok(Arc::new(MemoryBackend::new()) as Arc<dyn ServiceDiscoveryBackend>)
        });
        registry.register(SledBackend::NAME, |config| {
            Ok(Arc::new(SledBackend::from_config(config)?) as Arc<dyn ServiceDiscoveryBackend>)
        });
        registry
    }

    /// Add or replace an implementation
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&JsonObject) -> Result<Arc<dyn ServiceDiscoveryBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Registered implementation names, first one is the default
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the backend named by `backend-name`, or the first registered one
    pub fn create(&self, config: &JsonObject) -> Result<Arc<dyn ServiceDiscoveryBackend>> {
        let (name, factory) = match config.get(BACKEND_NAME_KEY) {
            Some(Value::String(name)) => {
                let factory = self.factories.get(name).ok_or_else(|| {
                    Error::InvalidConfiguration(format!("Unknown backend: {}", name))
                })?;
                (name.as_str(), factory)
            }
            Some(other) => {
                return Err(Error::InvalidConfiguration(format!(
                    "'{}' must be a string, got {}",
                    BACKEND_NAME_KEY, other
                )));
            }
            None => self
                .factories
                .get_index(0)
                .map(|(name, factory)| (name.as_str(), factory))
                .ok_or_else(|| {
                    Error::InvalidConfiguration("No backend registered".to_string())
                })?,
        };

        info!("Using {} discovery backend", name);
        factory(config)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Generate a fresh registration id
pub(crate) fn new_registration() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reject records that were already stored
pub(crate) fn ensure_unregistered(record: &Record) -> Result<()> {
    match &record.registration {
        Some(registration) => Err(Error::AlreadyRegistered(registration.clone())),
        None => Ok(()),
    }
}

/// Registration id of a record that must already be stored
pub(crate) fn registration_of(record: &Record) -> Result<&str> {
    record
        .registration
        .as_deref()
        .ok_or_else(|| Error::MissingRegistration(record.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_backend_is_memory() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["memory", "sled"]);

        let backend = registry.create(&JsonObject::new()).unwrap();
        assert_eq!(backend.name(), "memory");
    }

    #[test]
    fn test_select_by_name() {
        let registry = BackendRegistry::with_defaults();
        let backend = registry
            .create(&config(json!({"backend-name": "sled"})))
            .unwrap();
        assert_eq!(backend.name(), "sled");
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let registry = BackendRegistry::with_defaults();
        let result = registry.create(&config(json!({"backend-name": "zookeeper"})));
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = BackendRegistry::new().create(&JsonObject::new());
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_custom_backend_registration() {
        let mut registry = BackendRegistry::new();
        registry.register("local", |_| {
            Ok(Arc::new(MemoryBackend::new()) as Arc<dyn ServiceDiscoveryBackend>)
        });
        let backend = registry.create(&JsonObject::new()).unwrap();
        assert_eq!(backend.name(), "memory");
    }
}
