//! Importers: mirror an external source of truth into the registry
//!
//! An [`ImportBridge`] consumes any [`WatchableSource`]: it publishes a
//! record for every listed item, then follows the source's watch stream,
//! batching changes over a debounce window. When the stream ends it resyncs
//! from a fresh listing.

mod bridge;
mod catalog;
mod compaction;
mod manual;

pub use self::bridge::ImportBridge;
pub use self::catalog::{ExternalService, infer_type};
pub use self::compaction::{Outcome, PendingBatch};
pub use self::manual::{DEFAULT_HISTORY_LIMIT, ManualSource};

use crate::{
    error::{Error, Result},
    publisher::ServicePublisher,
    record::{JsonObject, Record},
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A collaborator that feeds records into a discovery instance
#[async_trait]
pub trait ServiceImporter: Send + Sync {
    /// Start importing; the importer is registered only if this succeeds
    async fn start(&self, publisher: Arc<dyn ServicePublisher>, config: JsonObject) -> Result<()>;

    /// Stop importing
    async fn close(&self) -> Result<()>;
}

/// Opaque position in a source's change history
pub type ResumeToken = String;

/// One change reported by a watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    /// Item appeared
    Added(T),
    /// Item changed
    Modified(T),
    /// Item disappeared
    Deleted(T),
    /// Resume position, no item change
    Bookmark(ResumeToken),
}

/// Stream of watch events; ends or fails when the source cannot resume
pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>>>;

/// Item of an external catalog that can be turned into a record
pub trait ImportableItem: Clone + Send + Sync + 'static {
    /// Stable external identity, unique within the source
    fn identity(&self) -> String;

    /// Unpublished record describing this item
    fn to_record(&self) -> Record;
}

/// External source of truth a bridge mirrors
#[async_trait]
pub trait WatchableSource: Send + Sync + 'static {
    /// Item type listed and watched
    type Item: ImportableItem;

    /// Full listing and the token to watch from
    async fn list_all(&self) -> Result<(Vec<Self::Item>, ResumeToken)>;

    /// Changes after `token`
    async fn watch(&self, token: &ResumeToken) -> Result<WatchStream<Self::Item>>;
}

/// Key of an imported entry: external identity plus resolved endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportedKey(String);

impl ImportedKey {
    /// Key of an item
    pub fn of<T: ImportableItem>(item: &T) -> Self {
        Self::from_record(&item.identity(), &item.to_record())
    }

    /// Key from an identity and the record built for it
    pub fn from_record(identity: &str, record: &Record) -> Self {
        match record.endpoint() {
            Some(endpoint) => ImportedKey(format!("{}@{}", identity, endpoint)),
            None => ImportedKey(identity.to_string()),
        }
    }

    /// Key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImportedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-bridge settings, read from the importer registration config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Debounce window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay before a resync attempt in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Unpublish every imported record when the bridge closes
    #[serde(default = "default_unpublish_on_close")]
    pub unpublish_on_close: bool,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_unpublish_on_close() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            unpublish_on_close: default_unpublish_on_close(),
        }
    }
}

impl BridgeConfig {
    /// Parse from a registration config; unknown keys are ignored
    pub fn from_json(config: &JsonObject) -> Result<Self> {
        serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| Error::InvalidConfiguration(format!("import bridge: {}", e)))
    }

    /// Debounce window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Resync delay
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bridge_config_defaults() {
        let config = BridgeConfig::from_json(&JsonObject::new()).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert_eq!(config.retry_delay(), Duration::from_secs(2));
        assert!(config.unpublish_on_close);
    }

    #[test]
    fn test_bridge_config_overrides() {
        let raw = json!({"debounce_ms": 10, "unpublish_on_close": false, "namespace": "x"});
        let config = BridgeConfig::from_json(raw.as_object().unwrap()).unwrap();
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.retry_delay_ms, 2000);
        assert!(!config.unpublish_on_close);

        let raw = json!({"debounce_ms": "soon"});
        assert!(matches!(
            BridgeConfig::from_json(raw.as_object().unwrap()),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_imported_key() {
        let with_endpoint = Record::new("a", "t").with_endpoint("http://h:80/");
        assert_eq!(
            ImportedKey::from_record("uid-1", &with_endpoint).as_str(),
            "uid-1@http://h:80/"
        );
        let bare = Record::new("a", "t");
        assert_eq!(ImportedKey::from_record("uid-1", &bare).to_string(), "uid-1");
    }
}
