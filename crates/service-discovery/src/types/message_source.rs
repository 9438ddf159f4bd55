//! Message source service type

use super::{ServiceObject, ServiceType};
use crate::{
    error::{Error, Result},
    record::{JsonObject, Record},
};
use std::sync::Arc;

/// Metadata key naming the payload type carried by the source
pub const MESSAGE_TYPE_KEY: &str = "message.type";

/// The `message-source` service type: a named address producing messages
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageSource;

impl MessageSource {
    /// Record type tag
    pub const TYPE: &'static str = "message-source";

    /// Build an unpublished record for a message address
    pub fn create_record(
        name: impl Into<String>,
        address: impl Into<String>,
        payload_type: Option<&str>,
    ) -> Record {
        let record = Record::new(name, Self::TYPE).with_endpoint(address);
        match payload_type {
            Some(payload_type) => record.with_metadata(MESSAGE_TYPE_KEY, payload_type),
            None => record,
        }
    }
}

impl ServiceType for MessageSource {
    fn name(&self) -> &str {
        Self::TYPE
    }

    fn create(&self, record: &Record, _config: &JsonObject) -> Result<ServiceObject> {
        let address = record
            .endpoint()
            .ok_or_else(|| Error::ServiceObjectCreation {
                service_type: Self::TYPE.to_string(),
                reason: format!("record '{}' has no endpoint", record.name),
            })?;

        Ok(Arc::new(MessageSourceHandle {
            address: address.to_string(),
            payload_type: record
                .metadata
                .get(MESSAGE_TYPE_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }))
    }
}

/// Handle on a message source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSourceHandle {
    /// Address messages are published on
    pub address: String,
    /// Declared payload type, if any
    pub payload_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_handle() {
        let record = MessageSource::create_record("orders", "orders.created", Some("json"));
        let object = MessageSource.create(&record, &JsonObject::new()).unwrap();
        let handle = object.downcast_ref::<MessageSourceHandle>().unwrap();
        assert_eq!(handle.address, "orders.created");
        assert_eq!(handle.payload_type.as_deref(), Some("json"));
    }

    #[test]
    fn test_missing_endpoint() {
        let record = Record::new("orders", MessageSource::TYPE);
        assert!(MessageSource.create(&record, &JsonObject::new()).is_err());
    }
}
