//! HTTP endpoint service type

use super::{ServiceObject, ServiceType};
use crate::{
    error::{Error, Result},
    record::{JsonObject, Record, Status},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Location of an HTTP endpoint record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpLocation {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Path prefix, always starting with `/`
    #[serde(default = "default_root")]
    pub root: String,
    /// Whether to use TLS
    #[serde(default)]
    pub ssl: bool,
    /// Full URL, derived from the other fields when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_root() -> String {
    "/".to_string()
}

impl HttpLocation {
    /// Plain HTTP location at the server root
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            root: default_root(),
            ssl: false,
            endpoint: None,
        }
    }

    /// Set the path prefix
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        let root = root.into();
        self.root = if root.starts_with('/') {
            root
        } else {
            format!("/{}", root)
        };
        self
    }

    /// Enable or disable TLS
    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// URL of the endpoint
    pub fn url(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.clone();
        }
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.root)
    }

    /// JSON form with `endpoint` filled in
    pub fn to_location(&self) -> JsonObject {
        let mut location = JsonObject::new();
        location.insert("host".to_string(), Value::from(self.host.clone()));
        location.insert("port".to_string(), Value::from(self.port));
        location.insert("root".to_string(), Value::from(self.root.clone()));
        location.insert("ssl".to_string(), Value::from(self.ssl));
        location.insert("endpoint".to_string(), Value::from(self.url()));
        location
    }
}

/// The `http-endpoint` service type
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpEndpoint;

impl HttpEndpoint {
    /// Record type tag
    pub const TYPE: &'static str = "http-endpoint";

    /// Build an unpublished record for an HTTP endpoint
    pub fn create_record(name: impl Into<String>, location: &HttpLocation) -> Record {
        Record {
            name: name.into(),
            record_type: Self::TYPE.to_string(),
            location: location.to_location(),
            status: Status::Unknown,
            ..Default::default()
        }
    }
}

impl ServiceType for HttpEndpoint {
    fn name(&self) -> &str {
        Self::TYPE
    }

    fn create(&self, record: &Record, config: &JsonObject) -> Result<ServiceObject> {
        let location: HttpLocation = serde_json::from_value(Value::Object(record.location.clone()))
            .map_err(|e| Error::ServiceObjectCreation {
                service_type: Self::TYPE.to_string(),
                reason: format!("invalid location for '{}': {}", record.name, e),
            })?;

        debug!("Creating HTTP client for {}", location.url());
        Ok(std::sync::Arc::new(HttpEndpointClient {
            base_url: location.url(),
            location,
            options: config.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn teardown(&self, object: &ServiceObject) {
        if let Some(client) = object.downcast_ref::<HttpEndpointClient>() {
            debug!("Closing HTTP client for {}", client.base_url);
            client.close();
        }
    }
}

/// Client handle for an HTTP endpoint record
#[derive(Debug)]
pub struct HttpEndpointClient {
    location: HttpLocation,
    base_url: String,
    options: JsonObject,
    closed: AtomicBool,
}

impl HttpEndpointClient {
    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Location the client was built from
    pub fn location(&self) -> &HttpLocation {
        &self.location
    }

    /// Client options passed at bind time
    pub fn options(&self) -> &JsonObject {
        &self.options
    }

    /// Absolute URL for a path relative to the endpoint root
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Whether the client was torn down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
