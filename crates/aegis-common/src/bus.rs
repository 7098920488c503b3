//! Process-local event bus
//!
//! Multi-producer/multi-consumer broadcast of typed events. Subsystems
//! receive a handle at construction time; there are no global singletons.

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::BusEvent;

/// Default buffered capacity per subscriber
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Cloneable handle to the process-local event bus
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    /// Publish an event. Publishing with no live subscribers is not an
    /// error; the event is dropped.
    pub fn publish(&self, event: BusEvent) {
        match self.tx.send(event) {
            Ok(n) => debug!("bus event delivered to {} subscribers", n),
            Err(_) => debug!("bus event dropped (no subscribers)"),
        }
    }

    /// Subscribe to all events from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(DEFAULT_BUS_CAPACITY)
    }
}
