//! Exporters mirror registry changes to an external system

use crate::{
    error::Result,
    publisher::ServicePublisher,
    record::{JsonObject, Record},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives every record change of a discovery instance.
///
/// Notifications arrive after the backend write completed.
#[async_trait]
pub trait ServiceExporter: Send + Sync {
    /// Start the exporter; it becomes active only if this succeeds
    async fn init(&self, publisher: Arc<dyn ServicePublisher>, config: JsonObject) -> Result<()>;

    /// A record was published
    async fn on_publish(&self, record: Record);

    /// A record was updated
    async fn on_update(&self, record: Record);

    /// The record with this registration was unpublished
    async fn on_unpublish(&self, registration: &str);

    /// Stop the exporter
    async fn close(&self) -> Result<()>;
}
