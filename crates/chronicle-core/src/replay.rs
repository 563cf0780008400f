//! Replaying the whole event store through the bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tracing::{debug, info, instrument};

use crate::bus::{AsynchronousDomainEventBus, DomainEventBus};
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::store::EventStore;
use crate::stream::DomainEventStream;

/// Rebuilds projections by publishing every stored message again.
pub struct ReplayService<E: DomainEvent> {
    store: Arc<dyn EventStore<E>>,
    bus: AsynchronousDomainEventBus<E>,
}

impl<E: DomainEvent> ReplayService<E> {
    /// Creates a service replaying `store` onto `bus`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore<E>>, bus: AsynchronousDomainEventBus<E>) -> Self {
        Self { store, bus }
    }

    /// Publishes every stored message and waits for the bus to go idle.
    ///
    /// Returns the number of messages read from the store.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the store's stream early, if any.
    /// Listener failures are reported through the bus instead.
    #[instrument(skip(self))]
    pub async fn replay(&self) -> Result<usize, DomainError> {
        let replayed = Arc::new(AtomicUsize::new(0));
        let failure: Arc<Mutex<Option<DomainError>>> = Arc::default();

        let counter = Arc::clone(&replayed);
        let slot = Arc::clone(&failure);
        let stream = self.store.load_all().await.inspect(move |item| match item {
            Ok(_) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.clone());
            }
        });

        debug!("replay started");
        self.bus.publish(DomainEventStream::from_stream(stream));
        self.bus.until_idle().await;

        if let Some(error) = failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(error);
        }
        let count = replayed.load(Ordering::Relaxed);
        info!(count, "replay finished");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::bus::EventListener;
    use crate::event::DomainMessage;
    use crate::event::fixtures::TestEvent;
    use crate::identity::Identity;
    use crate::store::InMemoryEventStore;

    #[derive(Default)]
    struct Tally {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventListener<TestEvent> for Tally {
        fn handled_event_types(&self) -> &'static [&'static str] {
            &["test.created", "test.renamed"]
        }

        async fn handle(&self, message: &DomainMessage<TestEvent>) -> Result<(), DomainError> {
            self.seen.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    fn created(id: &str, playhead: u64) -> DomainMessage<TestEvent> {
        DomainMessage::record_now(
            Identity::new(id),
            playhead,
            TestEvent::Created { name: id.into() },
        )
    }

    struct BrokenStore;

    #[async_trait]
    impl EventStore<TestEvent> for BrokenStore {
        async fn has(&self, _id: &Identity) -> Result<bool, DomainError> {
            Ok(false)
        }

        async fn load_from_playhead(
            &self,
            id: &Identity,
            _playhead: u64,
        ) -> Result<DomainEventStream<TestEvent>, DomainError> {
            Err(DomainError::StreamNotFound(id.clone()))
        }

        async fn load_all(&self) -> DomainEventStream<TestEvent> {
            DomainEventStream::of(vec![created("a", 0)]).append(DomainEventStream::failed(
                DomainError::Infrastructure("connection reset".into()),
            ))
        }

        async fn append(
            &self,
            _id: &Identity,
            _stream: DomainEventStream<TestEvent>,
        ) -> Result<(), DomainError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_replay_publishes_every_stored_message() {
        // Arrange
        let store = InMemoryEventStore::from_messages(vec![
            created("b", 0),
            created("a", 0),
            created("a", 1),
        ])
        .unwrap();
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();
        let tally = Arc::new(Tally::default());
        bus.subscribe(Arc::clone(&tally) as Arc<dyn EventListener<TestEvent>>)
            .unwrap();
        let service = ReplayService::<TestEvent>::new(Arc::new(store), bus);

        // Act
        let count = service.replay().await.unwrap();

        // Assert
        assert_eq!(count, 3);
        assert_eq!(
            *tally.seen.lock().unwrap(),
            vec!["a:0:test.created", "a:1:test.created", "b:0:test.created"]
        );
    }

    #[tokio::test]
    async fn test_replay_returns_store_stream_error() {
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();
        let tally = Arc::new(Tally::default());
        bus.subscribe(Arc::clone(&tally) as Arc<dyn EventListener<TestEvent>>)
            .unwrap();
        let service = ReplayService::<TestEvent>::new(Arc::new(BrokenStore), bus);

        let result = service.replay().await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(tally.seen.lock().unwrap().len(), 1);
    }
}
