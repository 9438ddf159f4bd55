//! In-process publish/subscribe on named addresses
//!
//! The announce and usage channels are addresses on an [`EventBus`]. Several
//! discovery instances can share one bus, the same way they share a backend.

use async_channel::{Receiver, Sender};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Fan-out of JSON envelopes to the subscribers of an address
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<Sender<Value>>>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an address; dropping the receiver unsubscribes
    pub fn subscribe(&self, address: &str) -> Receiver<Value> {
        let (tx, rx) = async_channel::unbounded();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.entry(address.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver an envelope to every live subscriber, returning how many got it
    pub fn publish(&self, address: &str, envelope: Value) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = subscribers.get_mut(address) else {
            return 0;
        };

        // Unbounded channels only fail once the receiver is gone
        senders.retain(|tx| tx.try_send(envelope.clone()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            subscribers.remove(address);
        }

        debug!("Published on {} to {} subscribers", address, delivered);
        delivered
    }

    /// Number of live subscribers on an address
    pub fn subscriber_count(&self, address: &str) -> usize {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers
            .get(address)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}
