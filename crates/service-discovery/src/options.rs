//! Configuration for a discovery instance

use crate::{error::Result, record::JsonObject};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default announce channel address
pub const DEFAULT_ANNOUNCE_ADDRESS: &str = "service-discovery.announce";

/// Default usage channel address
pub const DEFAULT_USAGE_ADDRESS: &str = "service-discovery.usage";

/// Options for a [`ServiceDiscovery`](crate::ServiceDiscovery) instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Instance name, used in logs
    #[serde(default = "default_name")]
    pub name: String,
    /// Address record announcements are broadcast on
    #[serde(default = "default_announce_address")]
    pub announce_address: String,
    /// Address bind/release events are broadcast on, `None` disables them
    #[serde(default = "default_usage_address")]
    pub usage_address: Option<String>,
    /// Backend configuration; `backend-name` selects the implementation
    #[serde(default)]
    pub backend_configuration: JsonObject,
    /// How many unpublished records stay visible to out-of-service lookups
    #[serde(default = "default_retired_capacity")]
    pub retired_capacity: usize,
}

fn default_name() -> String {
    "service-discovery".to_string()
}

fn default_announce_address() -> String {
    DEFAULT_ANNOUNCE_ADDRESS.to_string()
}

fn default_usage_address() -> Option<String> {
    Some(DEFAULT_USAGE_ADDRESS.to_string())
}

fn default_retired_capacity() -> usize {
    64
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            name: default_name(),
            announce_address: default_announce_address(),
            usage_address: default_usage_address(),
            backend_configuration: JsonObject::new(),
            retired_capacity: default_retired_capacity(),
        }
    }
}

impl DiscoveryOptions {
    /// Load options from a YAML (`.yaml`/`.yml`) or JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use async_fs::File;
        use futures::io::AsyncReadExt;

        let path = path.as_ref();
        let mut file = File::open(path).await?;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
            _ => Ok(serde_json::from_str(&contents)?),
        }
    }

    /// Set the instance name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the announce address
    pub fn with_announce_address(mut self, address: impl Into<String>) -> Self {
        self.announce_address = address.into();
        self
    }

    /// Set or disable the usage address
    pub fn with_usage_address(mut self, address: Option<String>) -> Self {
        self.usage_address = address;
        self
    }

    /// Set the backend configuration
    pub fn with_backend_configuration(mut self, configuration: JsonObject) -> Self {
        self.backend_configuration = configuration;
        self
    }

    /// Set the retired-record capacity, 0 disables the view
    pub fn with_retired_capacity(mut self, capacity: usize) -> Self {
        self.retired_capacity = capacity;
        self
    }
}
