//! Record model: the published descriptor of one discoverable resource

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON object used for locations, metadata, filters and configuration
pub type JsonObject = serde_json::Map<String, Value>;

/// Type tag for records whose kind could not be determined
pub const UNKNOWN_TYPE: &str = "unknown";

/// Conventional location key holding the resource endpoint
pub const ENDPOINT_KEY: &str = "endpoint";

/// Filter value matching any present value
pub const ANY_VALUE: &str = "*";

/// Record status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Resource is available
    Up,
    /// Resource is gone or has been unpublished
    Down,
    /// Resource exists but should not be used
    OutOfService,
    /// Status not set yet
    #[default]
    Unknown,
}

impl Status {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::OutOfService => "OUT_OF_SERVICE",
            Status::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published service record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Human-readable name, not unique
    #[serde(default)]
    pub name: String,

    /// Resource kind, drives service type resolution
    #[serde(rename = "type", default = "unknown_type")]
    pub record_type: String,

    /// Type-specific addressing data
    #[serde(default)]
    pub location: JsonObject,

    /// Free-form filterable attributes
    #[serde(default)]
    pub metadata: JsonObject,

    /// Current status
    #[serde(default)]
    pub status: Status,

    /// Registration id assigned by the backend, `None` until published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
}

fn unknown_type() -> String {
    UNKNOWN_TYPE.to_string()
}

impl Default for Record {
    fn default() -> Self {
        Self {
            name: String::new(),
            record_type: unknown_type(),
            location: JsonObject::new(),
            metadata: JsonObject::new(),
            status: Status::Unknown,
            registration: None,
        }
    }
}

impl Record {
    /// Create an unpublished record
    pub fn new(name: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            record_type: record_type.into(),
            ..Default::default()
        }
    }

    /// Set a location entry
    pub fn with_location(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.location.insert(key.into(), value.into());
        self
    }

    /// Set the conventional `endpoint` location entry
    pub fn with_endpoint(self, endpoint: impl Into<String>) -> Self {
        self.with_location(ENDPOINT_KEY, endpoint.into())
    }

    /// Set a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// The `endpoint` location entry, if it is a string
    pub fn endpoint(&self) -> Option<&str> {
        self.location.get(ENDPOINT_KEY).and_then(Value::as_str)
    }

    /// Whether the backend has stored this record
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Copy of this record without its registration id
    pub fn without_registration(&self) -> Self {
        Self {
            registration: None,
            ..self.clone()
        }
    }

    /// JSON form, as broadcast on the bus
    pub fn to_json(&self) -> Value {
        // A record only holds JSON-native data
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Whether this record satisfies a field/metadata filter.
    ///
    /// Every filter key must match: `name`, `registration`, `status` and
    /// `type` address record fields, any other key addresses metadata.
    /// Strings compare case-insensitively and `"*"` only requires presence.
    pub fn matches(&self, filter: &JsonObject) -> bool {
        filter.iter().all(|(key, expected)| {
            let actual = match key.as_str() {
                "name" => Some(FieldValue::Text(&self.name)),
                "registration" => self.registration.as_deref().map(FieldValue::Text),
                "status" => Some(FieldValue::Text(self.status.as_str())),
                "type" => Some(FieldValue::Text(&self.record_type)),
                _ => self.metadata.get(key).map(FieldValue::Json),
            };
            field_matches(actual, expected)
        })
    }
}

enum FieldValue<'a> {
    Text(&'a str),
    Json(&'a Value),
}

fn field_matches(actual: Option<FieldValue<'_>>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };

    if expected.as_str() == Some(ANY_VALUE) {
        return true;
    }

    match actual {
        FieldValue::Text(text) => text_matches(text, expected),
        FieldValue::Json(Value::String(text)) => text_matches(text, expected),
        FieldValue::Json(value) => value == expected,
    }
}

fn text_matches(text: &str, expected: &Value) -> bool {
    match expected {
        Value::String(expected) => text.eq_ignore_ascii_case(expected),
        other => text.eq_ignore_ascii_case(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> Record {
        Record::new("svc", "http-endpoint")
            .with_endpoint("http://h:80/")
            .with_metadata("zone", "EU-West")
            .with_metadata("weight", 3)
            .with_status(Status::Up)
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(sample().matches(&JsonObject::new()));
        assert!(Record::default().matches(&JsonObject::new()));
    }

    #[test]
    fn test_wildcard_requires_presence() {
        let record = sample();
        assert!(record.matches(&filter(json!({"zone": "*"}))));
        assert!(record.matches(&filter(json!({"name": "*"}))));
        assert!(!record.matches(&filter(json!({"rack": "*"}))));

        // Not published yet, so there is no registration to match
        assert!(!record.matches(&filter(json!({"registration": "*"}))));
    }

    #[test]
    fn test_string_match_is_case_insensitive() {
        let record = sample();
        assert!(record.matches(&filter(json!({"name": "SVC", "zone": "eu-west"}))));
        assert!(record.matches(&filter(json!({"status": "up", "type": "HTTP-ENDPOINT"}))));
        assert!(!record.matches(&filter(json!({"name": "other"}))));
    }

    #[test]
    fn test_non_string_metadata_compares_by_value() {
        let record = sample();
        assert!(record.matches(&filter(json!({"weight": 3}))));
        assert!(!record.matches(&filter(json!({"weight": 4}))));
    }

    #[test]
    fn test_every_key_must_match() {
        let record = sample();
        assert!(!record.matches(&filter(json!({"name": "svc", "zone": "us-east"}))));
    }

    #[test]
    fn test_json_form() {
        let json = sample().to_json();
        assert_eq!(json["type"], "http-endpoint");
        assert_eq!(json["status"], "UP");
        assert!(json.get("registration").is_none());

        let parsed: Record = serde_json::from_value(json!({
            "name": "db",
            "status": "OUT_OF_SERVICE",
            "registration": "r1"
        }))
        .unwrap();
        assert_eq!(parsed.record_type, UNKNOWN_TYPE);
        assert_eq!(parsed.status, Status::OutOfService);
        assert_eq!(parsed.registration.as_deref(), Some("r1"));
    }
}
