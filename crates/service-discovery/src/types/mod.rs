//! Service types: turn a record into the object a consumer talks to
//!
//! Each record declares a `type`. The [`ServiceTypes`] table maps that tag to
//! a [`ServiceType`] which builds the service object on first use and tears
//! it down on release. The table is built explicitly at start-up.

pub mod http;
pub mod message_source;

use crate::{
    error::{Error, Result},
    record::{JsonObject, Record},
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

pub use self::http::{HttpEndpoint, HttpEndpointClient, HttpLocation};
pub use self::message_source::{MessageSource, MessageSourceHandle};

/// Object handed to consumers for a bound record
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Factory for service objects of one record type
pub trait ServiceType: Send + Sync {
    /// Record type tag this factory serves
    fn name(&self) -> &str;

    /// Build the service object for a record
    fn create(&self, record: &Record, config: &JsonObject) -> Result<ServiceObject>;

    /// Release resources held by a service object built by [`create`](Self::create)
    fn teardown(&self, _object: &ServiceObject) {}
}

/// Lookup table from record type to service type
#[derive(Clone, Default)]
pub struct ServiceTypes {
    types: HashMap<String, Arc<dyn ServiceType>>,
}

impl ServiceTypes {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in `http-endpoint` and `message-source` types
    pub fn with_defaults() -> Self {
        let mut types = Self::new();
        types.register(HttpEndpoint);
        types.register(MessageSource);
        types
    }

    /// Add or replace a service type under its own name
    pub fn register(&mut self, service_type: impl ServiceType + 'static) {
        self.types
            .insert(service_type.name().to_string(), Arc::new(service_type));
    }

    /// Resolve a record type
    pub fn resolve(&self, record_type: &str) -> Result<Arc<dyn ServiceType>> {
        self.types
            .get(record_type)
            .cloned()
            .ok_or_else(|| Error::UnsupportedType(record_type.to_string()))
    }

    /// Registered type names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
