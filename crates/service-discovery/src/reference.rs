//! Service references: one consumer binding to one record

use crate::{
    error::{Error, Result},
    record::{JsonObject, Record},
    types::{ServiceObject, ServiceType},
};
use futures::lock::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

enum ReferenceState {
    /// Bound, holding the service object once built
    Bound(Option<ServiceObject>),
    /// Released; terminal
    Released,
}

/// A binding that lazily builds and caches the service object of a record.
///
/// `get()` builds the object once; `release()` tears it down once. Both take
/// the reference's lock for the whole check-and-act step.
pub struct ServiceReference {
    id: Uuid,
    record: Record,
    service_type: Arc<dyn ServiceType>,
    configuration: JsonObject,
    state: Mutex<ReferenceState>,
}

impl ServiceReference {
    pub(crate) fn new(
        record: Record,
        service_type: Arc<dyn ServiceType>,
        configuration: JsonObject,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            service_type,
            configuration,
            state: Mutex::new(ReferenceState::Bound(None)),
        }
    }

    /// Identity of this binding
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The bound record
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Configuration passed to the service type factory
    pub fn configuration(&self) -> &JsonObject {
        &self.configuration
    }

    /// Service object, built on first call
    pub async fn get(&self) -> Result<ServiceObject> {
        let mut state = self.state.lock().await;
        match &mut *state {
            ReferenceState::Released => Err(Error::ReferenceReleased(self.id.to_string())),
            ReferenceState::Bound(Some(object)) => Ok(object.clone()),
            ReferenceState::Bound(cached) => {
                debug!(
                    "Creating {} service object for {}",
                    self.record.record_type, self.record.name
                );
                let object = self.service_type.create(&self.record, &self.configuration)?;
                *cached = Some(object.clone());
                Ok(object)
            }
        }
    }

    /// Service object downcast to its concrete type
    pub async fn get_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get()
            .await?
            .downcast::<T>()
            .map_err(|_| Error::ServiceObjectCreation {
                service_type: self.record.record_type.clone(),
                reason: format!("service object is not a {}", std::any::type_name::<T>()),
            })
    }

    /// Cached service object, without building one
    pub async fn cached(&self) -> Option<ServiceObject> {
        match &*self.state.lock().await {
            ReferenceState::Bound(cached) => cached.clone(),
            ReferenceState::Released => None,
        }
    }

    /// Whether the reference has been released by its discovery instance
    pub async fn is_released(&self) -> bool {
        matches!(&*self.state.lock().await, ReferenceState::Released)
    }

    /// Tear down the cached object and move to released.
    ///
    /// Returns `true` only for the call that performed the transition.
    /// Callers outside the crate go through `ServiceDiscovery::release`,
    /// which also drops the binding and emits the usage event.
    pub(crate) async fn release(&self) -> bool {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, ReferenceState::Released) {
            ReferenceState::Released => false,
            ReferenceState::Bound(cached) => {
                if let Some(object) = cached {
                    self.service_type.teardown(&object);
                }
                debug!("Released reference {} to {}", self.id, self.record.name);
                true
            }
        }
    }

    /// Whether `object` is the cached service object
    pub(crate) async fn holds(&self, object: &ServiceObject) -> bool {
        match &*self.state.lock().await {
            ReferenceState::Bound(Some(cached)) => {
                std::ptr::eq(
                    Arc::as_ptr(cached) as *const (),
                    Arc::as_ptr(object) as *const (),
                )
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id)
            .field("record", &self.record.name)
            .field("type", &self.record.record_type)
            .finish()
    }
}
