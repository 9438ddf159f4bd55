//! Publisher capability handed to importers and exporters

use crate::{error::Result, record::Record};
use async_trait::async_trait;

/// Narrow publishing view of a discovery instance
#[async_trait]
pub trait ServicePublisher: Send + Sync {
    /// Publish an unpublished record, returning it with its registration
    async fn publish(&self, record: Record) -> Result<Record>;

    /// Unpublish by registration id, returning the departed record
    async fn unpublish(&self, registration: &str) -> Result<Record>;

    /// Overwrite a published record
    async fn update(&self, record: Record) -> Result<Record>;
}
