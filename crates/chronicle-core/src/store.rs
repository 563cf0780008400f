//! Event store abstraction and the in-memory store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::decorator::PlayheadSequence;
use crate::error::DomainError;
use crate::event::{DomainEvent, DomainMessage};
use crate::identity::Identity;
use crate::stream::DomainEventStream;

/// Append-only, per-aggregate log of domain messages.
///
/// Every implementation enforces that stored playheads for an identity are
/// exactly `0..n`: an append must continue from the current tail, and a
/// rejected append leaves the log untouched.
#[async_trait]
pub trait EventStore<E: DomainEvent>: Send + Sync {
    /// Returns `true` if at least one message was appended for `id`.
    async fn has(&self, id: &Identity) -> Result<bool, DomainError>;

    /// Loads the full stream for `id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` if nothing was appended for `id`.
    async fn load(&self, id: &Identity) -> Result<DomainEventStream<E>, DomainError> {
        self.load_from_playhead(id, 0).await
    }

    /// Loads the messages for `id` with playhead `>= playhead`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` if nothing was appended for `id`.
    async fn load_from_playhead(
        &self,
        id: &Identity,
        playhead: u64,
    ) -> Result<DomainEventStream<E>, DomainError>;

    /// Streams every identity's messages, each identity's in order.
    ///
    /// Read failures surface as an error item inside the stream.
    async fn load_all(&self) -> DomainEventStream<E>;

    /// Appends `stream` to the log for `id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Playhead` if the messages do not continue the
    /// stored tail, or the stream's own error if it fails. Either way nothing
    /// is written.
    async fn append(&self, id: &Identity, stream: DomainEventStream<E>) -> Result<(), DomainError>;
}

#[async_trait]
impl<E, S> EventStore<E> for Arc<S>
where
    E: DomainEvent,
    S: EventStore<E> + ?Sized,
{
    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        (**self).has(id).await
    }

    async fn load(&self, id: &Identity) -> Result<DomainEventStream<E>, DomainError> {
        (**self).load(id).await
    }

    async fn load_from_playhead(
        &self,
        id: &Identity,
        playhead: u64,
    ) -> Result<DomainEventStream<E>, DomainError> {
        (**self).load_from_playhead(id, playhead).await
    }

    async fn load_all(&self) -> DomainEventStream<E> {
        (**self).load_all().await
    }

    async fn append(&self, id: &Identity, stream: DomainEventStream<E>) -> Result<(), DomainError> {
        (**self).append(id, stream).await
    }
}

/// Checks that `messages` continue a log whose next playhead is `next`.
///
/// # Errors
///
/// Returns `DomainError::Playhead` for the first message out of sequence.
pub fn validate_continuation<E>(next: u64, messages: &[DomainMessage<E>]) -> Result<(), DomainError> {
    let mut sequence = PlayheadSequence::starting_at(next);
    messages.iter().try_for_each(|message| sequence.check(message))
}

/// Event store kept entirely in memory.
///
/// Identities are iterated in ascending order by [`EventStore::load_all`].
pub struct InMemoryEventStore<E> {
    streams: RwLock<BTreeMap<Identity, Vec<DomainMessage<E>>>>,
}

impl<E: DomainEvent> InMemoryEventStore<E> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a store seeded with `messages`, grouped by aggregate id.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Playhead` if any aggregate's messages are not
    /// sequential from 0.
    pub fn from_messages(messages: Vec<DomainMessage<E>>) -> Result<Self, DomainError> {
        let mut grouped: BTreeMap<Identity, Vec<DomainMessage<E>>> = BTreeMap::new();
        for message in messages {
            grouped
                .entry(message.aggregate_id.clone())
                .or_default()
                .push(message);
        }
        for stream in grouped.values() {
            validate_continuation(0, stream)?;
        }
        Ok(Self {
            streams: RwLock::new(grouped),
        })
    }

    /// Returns the playhead the next append for `id` must start at.
    #[must_use]
    pub fn next_playhead(&self, id: &Identity) -> u64 {
        self.read()
            .get(id)
            .map_or(0, |stream| stream.len() as u64)
    }

    /// Returns every stored message, identities in ascending order.
    #[must_use]
    pub fn all_messages(&self) -> Vec<DomainMessage<E>> {
        self.read().values().flatten().cloned().collect()
    }

    /// Validates and appends already materialized messages.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Playhead` if `messages` do not continue the tail.
    pub fn append_messages(
        &self,
        id: &Identity,
        messages: Vec<DomainMessage<E>>,
    ) -> Result<(), DomainError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut streams = self
            .streams
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let stream = streams.get(id);
        let next = stream.map_or(0, |s| s.len() as u64);
        validate_continuation(next, &messages)?;
        streams.entry(id.clone()).or_default().extend(messages);
        Ok(())
    }

    fn read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, BTreeMap<Identity, Vec<DomainMessage<E>>>> {
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: DomainEvent> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for InMemoryEventStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryEventStore")
            .field("aggregates", &streams.len())
            .finish()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for InMemoryEventStore<E> {
    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        Ok(self.read().contains_key(id))
    }

    #[instrument(skip(self), fields(aggregate_id = %id))]
    async fn load_from_playhead(
        &self,
        id: &Identity,
        playhead: u64,
    ) -> Result<DomainEventStream<E>, DomainError> {
        let messages = self
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::StreamNotFound(id.clone()))?;
        Ok(DomainEventStream::of(messages).from_playhead(playhead))
    }

    async fn load_all(&self) -> DomainEventStream<E> {
        DomainEventStream::of(self.all_messages())
    }

    #[instrument(skip(self, stream), fields(aggregate_id = %id))]
    async fn append(&self, id: &Identity, stream: DomainEventStream<E>) -> Result<(), DomainError> {
        let messages = stream.try_collect_messages().await?;
        let count = messages.len();
        if let Err(e) = self.append_messages(id, messages) {
            warn!(error = %e, "rejected append");
            return Err(e);
        }
        if count > 0 {
            info!(count, "appended events");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::event::fixtures::TestEvent;

    fn message(id: &str, playhead: u64) -> DomainMessage<TestEvent> {
        DomainMessage::record_now(Identity::new(id), playhead, TestEvent::Ignored)
    }

    fn messages(id: &str, playheads: impl IntoIterator<Item = u64>) -> DomainEventStream<TestEvent> {
        DomainEventStream::of(playheads.into_iter().map(|p| message(id, p)).collect())
    }

    async fn stored_playheads(store: &InMemoryEventStore<TestEvent>, id: &str) -> Vec<u64> {
        store
            .load(&Identity::new(id))
            .await
            .unwrap()
            .try_collect_messages()
            .await
            .unwrap()
            .iter()
            .map(|m| m.playhead)
            .collect()
    }

    #[tokio::test]
    async fn test_sequential_appends_load_in_order() {
        // Arrange
        let store = InMemoryEventStore::new();
        let id = Identity::new("a");

        // Act
        store.append(&id, messages("a", [0, 1])).await.unwrap();
        store.append(&id, messages("a", [2, 3])).await.unwrap();

        // Assert
        assert_eq!(stored_playheads(&store, "a").await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_duplicate_playhead_is_rejected_and_log_unchanged() {
        // Arrange
        let store = InMemoryEventStore::new();
        let id = Identity::new("a");
        store.append(&id, messages("a", [0, 1])).await.unwrap();

        // Act
        let result = store.append(&id, messages("a", [1])).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::Playhead {
                expected: 2,
                actual: 1,
                ..
            })
        ));
        assert_eq!(stored_playheads(&store, "a").await, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_partially_valid_batch_is_rejected_entirely() {
        let store = InMemoryEventStore::new();
        let id = Identity::new("a");

        let result = store.append(&id, messages("a", [0, 1, 3])).await;

        assert!(result.is_err());
        assert!(!store.has(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_first_append_must_start_at_zero() {
        let store = InMemoryEventStore::new();

        let result = store.append(&Identity::new("a"), messages("a", [1])).await;

        assert!(matches!(
            result,
            Err(DomainError::Playhead {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_load_from_playhead_returns_tail() {
        let store = InMemoryEventStore::new();
        let id = Identity::new("a");
        store.append(&id, messages("a", 0..4)).await.unwrap();

        let tail = store
            .load_from_playhead(&id, 2)
            .await
            .unwrap()
            .try_collect_messages()
            .await
            .unwrap();

        assert_eq!(tail.iter().map(|m| m.playhead).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_load_unknown_identity_fails_with_stream_not_found() {
        let store = InMemoryEventStore::<TestEvent>::new();

        let result = store.load(&Identity::new("missing")).await;

        assert!(matches!(result, Err(DomainError::StreamNotFound(id)) if id.as_str() == "missing"));
    }

    #[tokio::test]
    async fn test_empty_append_does_not_create_log() {
        let store = InMemoryEventStore::<TestEvent>::new();
        let id = Identity::new("a");

        store.append(&id, DomainEventStream::empty()).await.unwrap();

        assert!(!store.has(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_producer_error_rejects_append() {
        let store = InMemoryEventStore::new();
        let id = Identity::new("a");
        let failing = DomainEventStream::from_stream(stream::iter(vec![
            Ok(message("a", 0)),
            Err(DomainError::Infrastructure("source failed".into())),
        ]));

        let result = store.append(&id, failing).await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert!(!store.has(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_all_concatenates_identities_in_order() {
        let store = InMemoryEventStore::new();
        store.append(&Identity::new("b"), messages("b", [0])).await.unwrap();
        store.append(&Identity::new("a"), messages("a", [0, 1])).await.unwrap();

        let all = store.load_all().await.try_collect_messages().await.unwrap();

        let rendered: Vec<String> = all
            .iter()
            .map(|m| format!("{}:{}", m.aggregate_id, m.playhead))
            .collect();
        assert_eq!(rendered, vec!["a:0", "a:1", "b:0"]);
    }

    #[test]
    fn test_from_messages_rejects_gapped_history() {
        let result = InMemoryEventStore::from_messages(vec![message("a", 0), message("a", 2)]);

        assert!(result.is_err());
    }

    #[test]
    fn test_next_playhead_tracks_tail() {
        let store =
            InMemoryEventStore::from_messages(vec![message("a", 0), message("a", 1)]).unwrap();

        assert_eq!(store.next_playhead(&Identity::new("a")), 2);
        assert_eq!(store.next_playhead(&Identity::new("b")), 0);
    }
}
