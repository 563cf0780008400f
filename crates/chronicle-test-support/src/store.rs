//! `EventStore` doubles for tests.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, DomainMessage};
use chronicle_core::identity::Identity;
use chronicle_core::store::{EventStore, InMemoryEventStore};
use chronicle_core::stream::DomainEventStream;

/// An in-memory event store that records every successful append.
///
/// Messages seeded through [`RecordingEventStore::inner`] are not recorded,
/// which lets a test separate history from what the code under test wrote.
#[derive(Debug)]
pub struct RecordingEventStore<E> {
    inner: Arc<InMemoryEventStore<E>>,
    appended: Mutex<Vec<DomainMessage<E>>>,
}

impl<E: DomainEvent> RecordingEventStore<E> {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InMemoryEventStore::new()),
            appended: Mutex::new(Vec::new()),
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &Arc<InMemoryEventStore<E>> {
        &self.inner
    }

    /// Returns a snapshot of every message appended through this store.
    pub fn appended_messages(&self) -> Vec<DomainMessage<E>> {
        self.appended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded messages for one aggregate.
    pub fn appended_for(&self, id: &Identity) -> Vec<DomainMessage<E>> {
        self.appended_messages()
            .into_iter()
            .filter(|message| &message.aggregate_id == id)
            .collect()
    }
}

impl<E: DomainEvent> Default for RecordingEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for RecordingEventStore<E> {
    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        self.inner.has(id).await
    }

    async fn load_from_playhead(
        &self,
        id: &Identity,
        playhead: u64,
    ) -> Result<DomainEventStream<E>, DomainError> {
        self.inner.load_from_playhead(id, playhead).await
    }

    async fn load_all(&self) -> DomainEventStream<E> {
        self.inner.load_all().await
    }

    async fn append(&self, id: &Identity, stream: DomainEventStream<E>) -> Result<(), DomainError> {
        let messages = stream.try_collect_messages().await?;
        self.inner.append_messages(id, messages.clone())?;
        self.appended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(messages);
        Ok(())
    }
}

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore<E> {
    _event: PhantomData<fn() -> E>,
}

impl<E> FailingEventStore<E> {
    /// Creates the store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }

    fn refused() -> DomainError {
        DomainError::Infrastructure("connection refused".into())
    }
}

impl<E> Default for FailingEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for FailingEventStore<E> {
    async fn has(&self, _id: &Identity) -> Result<bool, DomainError> {
        Err(Self::refused())
    }

    async fn load_from_playhead(
        &self,
        _id: &Identity,
        _playhead: u64,
    ) -> Result<DomainEventStream<E>, DomainError> {
        Err(Self::refused())
    }

    async fn load_all(&self) -> DomainEventStream<E> {
        DomainEventStream::failed(Self::refused())
    }

    async fn append(&self, _id: &Identity, _stream: DomainEventStream<E>) -> Result<(), DomainError> {
        Err(Self::refused())
    }
}
