//! Generic catalog entries: a named host with ports and labels

use super::ImportableItem;
use crate::{
    record::{JsonObject, Record, UNKNOWN_TYPE},
    types::{HttpEndpoint, HttpLocation},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Label that forces the record type
pub const SERVICE_TYPE_LABEL: &str = "service-type";

/// One service as listed by an external catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalService {
    /// Catalog-assigned unique id
    pub uid: String,
    /// Service name
    pub name: String,
    /// Namespace the service lives in
    #[serde(default)]
    pub namespace: String,
    /// Free-form labels, copied into record metadata
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Host or address the service is reachable at
    pub host: String,
    /// Exposed ports
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Whether the service speaks TLS
    #[serde(default)]
    pub secure: bool,
}

impl ExternalService {
    /// Service with no ports or labels
    pub fn new(uid: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            namespace: String::new(),
            labels: BTreeMap::new(),
            host: host.into(),
            ports: Vec::new(),
            secure: false,
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a port
    pub fn with_port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    /// Mark as TLS
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Record type: the `service-type` label, else inferred from the ports
    pub fn service_type(&self) -> String {
        self.labels
            .get(SERVICE_TYPE_LABEL)
            .cloned()
            .unwrap_or_else(|| infer_type(&self.ports).to_string())
    }

    fn single_port(&self) -> Option<u16> {
        match self.ports.as_slice() {
            [port] => Some(*port),
            _ => None,
        }
    }

    fn location(&self, record_type: &str) -> JsonObject {
        let Some(port) = self.single_port() else {
            let mut location = JsonObject::new();
            location.insert("host".to_string(), Value::from(self.host.clone()));
            location.insert("endpoint".to_string(), Value::from(self.host.clone()));
            return location;
        };

        if record_type == HttpEndpoint::TYPE {
            return HttpLocation::new(self.host.clone(), port)
                .with_ssl(self.secure || port == 443)
                .to_location();
        }

        let endpoint = match record_type {
            "jdbc" if matches!(port, 3306 | 13306) => {
                format!("jdbc:mysql://{}:{}", self.host, port)
            }
            "jdbc" => format!("jdbc:postgresql://{}:{}", self.host, port),
            "redis" => format!("redis://{}:{}", self.host, port),
            "mongo" => format!("mongodb://{}:{}", self.host, port),
            _ => format!("{}:{}", self.host, port),
        };

        let mut location = JsonObject::new();
        location.insert("host".to_string(), Value::from(self.host.clone()));
        location.insert("port".to_string(), Value::from(port));
        location.insert("ssl".to_string(), Value::from(self.secure));
        location.insert("endpoint".to_string(), Value::from(endpoint));
        location
    }
}

/// Guess a record type from exposed ports; several ports are ambiguous
pub fn infer_type(ports: &[u16]) -> &'static str {
    match ports {
        [80 | 443 | 8080] => HttpEndpoint::TYPE,
        [5432 | 5433 | 3306 | 13306] => "jdbc",
        [6379] => "redis",
        [27017..=27019] => "mongo",
        _ => UNKNOWN_TYPE,
    }
}

impl ImportableItem for ExternalService {
    fn identity(&self) -> String {
        self.uid.clone()
    }

    fn to_record(&self) -> Record {
        let record_type = self.service_type();
        let mut record = Record::new(self.name.clone(), record_type.clone());
        record.location = self.location(&record_type);

        for (key, value) in &self.labels {
            record = record.with_metadata(key.clone(), value.clone());
        }
        record = record
            .with_metadata("service.uid", self.uid.clone())
            .with_metadata("service.namespace", self.namespace.clone());
        if let Some(port) = self.single_port() {
            record = record.with_metadata("service.port", port);
        }
        record
    }
}
