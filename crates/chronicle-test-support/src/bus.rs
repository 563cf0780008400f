//! A `DomainEventBus` decorator that records publications.

use std::sync::{Arc, Mutex, PoisonError};

use chronicle_core::bus::{DomainEventBus, EventListener};
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, DomainMessage};
use chronicle_core::stream::DomainEventStream;

/// Records every message published through it, then forwards the stream.
///
/// Messages are recorded as the wrapped bus consumes them, so wait for the
/// wrapped bus to go idle before inspecting them.
pub struct RecordingEventBus<E: DomainEvent> {
    bus: Arc<dyn DomainEventBus<E>>,
    messages: Arc<Mutex<Vec<DomainMessage<E>>>>,
}

impl<E: DomainEvent> RecordingEventBus<E> {
    /// Wraps `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn DomainEventBus<E>>) -> Self {
        Self {
            bus,
            messages: Arc::default(),
        }
    }

    /// Returns a snapshot of the recorded messages.
    pub fn messages(&self) -> Vec<DomainMessage<E>> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<E: DomainEvent> Clone for RecordingEventBus<E> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            messages: Arc::clone(&self.messages),
        }
    }
}

impl<E: DomainEvent> std::fmt::Debug for RecordingEventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingEventBus")
            .field("recorded", &self.messages().len())
            .finish_non_exhaustive()
    }
}

impl<E: DomainEvent> DomainEventBus<E> for RecordingEventBus<E> {
    fn subscribe(&self, listener: Arc<dyn EventListener<E>>) -> Result<(), DomainError> {
        self.bus.subscribe(listener)
    }

    fn publish(&self, stream: DomainEventStream<E>) {
        let messages = Arc::clone(&self.messages);
        self.bus.publish(stream.inspect_messages(move |message| {
            messages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message.clone());
        }));
    }
}
