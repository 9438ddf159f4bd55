//! Runtime-agnostic service discovery registry
//!
//! Providers publish [`Record`]s describing reachable resources; consumers
//! look them up, bind to one through a [`ServiceReference`] and obtain a
//! service object built by the record type's [`ServiceType`]. Records live
//! in a pluggable [`ServiceDiscoveryBackend`], so several discovery
//! instances can share one record set.
//!
//! # Architecture
//!
//! The crate works with any async runtime. It uses:
//!
//! - `futures` locks and combinators for shared state
//! - `async-channel` for the announce and usage channels of the [`EventBus`]
//! - `async-io` timers for import bridge debouncing and retries
//! - `sled` for the persistent backend
//!
//! Background work (import bridges) is handed to a caller-supplied
//! [`Spawner`]; `SmolSpawner` and `TokioSpawner` are available behind the
//! `smol` and `tokio` features.
//!
//! # Example
//!
//! ```no_run
//! use service_discovery::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> service_discovery::Result<()> {
//! let discovery = ServiceDiscovery::new(DiscoveryOptions::default())?;
//!
//! let record = HttpEndpoint::create_record("orders", &HttpLocation::new("10.0.0.7", 8080));
//! let published = discovery.publish(record).await?;
//!
//! let found = discovery.lookup(json!({"name": "orders"})).await?;
//! let reference = discovery.get_reference(&found).await?;
//! let client = reference.get_as::<HttpEndpointClient>().await?;
//! println!("calling {}", client.url_for("/health"));
//!
//! discovery.release(&reference).await;
//! discovery.unpublish(published.registration.as_deref().unwrap_or_default()).await?;
//! discovery.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod bus;
pub mod discovery;
pub mod error;
pub mod export;
pub mod filter;
pub mod import;
pub mod options;
pub mod publisher;
pub mod record;
pub mod reference;
pub mod runtime;
pub mod types;

pub use backend::{BackendRegistry, MemoryBackend, ServiceDiscoveryBackend, SledBackend};
pub use bus::EventBus;
pub use discovery::{ServiceDiscovery, ServiceDiscoveryBuilder, UsageKind};
pub use error::{Error, Result};
pub use export::ServiceExporter;
pub use filter::RecordFilter;
pub use import::{
    BridgeConfig, ExternalService, ImportBridge, ImportableItem, ImportedKey, ManualSource,
    ServiceImporter, WatchEvent, WatchableSource,
};
pub use options::DiscoveryOptions;
pub use publisher::ServicePublisher;
pub use record::{JsonObject, Record, Status};
pub use reference::ServiceReference;
pub use runtime::Spawner;
#[cfg(feature = "smol")]
pub use runtime::SmolSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
pub use types::{
    HttpEndpoint, HttpEndpointClient, HttpLocation, MessageSource, MessageSourceHandle,
    ServiceObject, ServiceType, ServiceTypes,
};

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        DiscoveryOptions, Error, HttpEndpoint, HttpEndpointClient, HttpLocation, Record,
        RecordFilter, Result, ServiceDiscovery, ServiceReference, Status,
    };
}
