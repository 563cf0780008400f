//! Domain event streams.
//!
//! Two types encode the two consumption models explicitly:
//!
//! - [`DomainEventStream`] is lazy and single-consumption. It may be backed
//!   by an in-memory list, a paginated query or an in-flight decoration
//!   pipeline, and it is consumed by value.
//! - [`MaterializedEventStream`] is a finite list already in memory. It is
//!   cheap to clone and [`MaterializedEventStream::stream`] can be called any
//!   number of times, each call replaying the same messages.
//!
//! Every `DomainEventStream` is fused on error: the first `Err` produced by
//! any underlying producer is yielded and the sequence ends there.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use futures::future;

use crate::error::DomainError;
use crate::event::DomainMessage;

/// Item produced by a [`DomainEventStream`].
pub type StreamItem<E> = Result<DomainMessage<E>, DomainError>;

/// Ordered, lazy, single-consumption sequence of domain messages.
pub struct DomainEventStream<E> {
    inner: BoxStream<'static, StreamItem<E>>,
}

impl<E> DomainEventStream<E>
where
    E: Send + 'static,
{
    /// Wraps any stream of messages, fusing it on the first error.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = StreamItem<E>> + Send + 'static,
    {
        let fused = stream.scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        });
        Self {
            inner: fused.boxed(),
        }
    }

    /// Creates a stream over a finite ordered list of messages.
    #[must_use]
    pub fn of(messages: Vec<DomainMessage<E>>) -> Self {
        Self::from_stream(stream::iter(messages.into_iter().map(Ok)))
    }

    /// Creates a stream that yields nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::of(Vec::new())
    }

    /// Creates a stream that fails immediately with `error`.
    #[must_use]
    pub fn failed(error: DomainError) -> Self {
        Self::from_stream(stream::once(future::ready(Err(error))))
    }

    /// Returns a stream yielding all of this stream's messages, then all of
    /// `other`'s. An error in this stream ends the combined stream.
    #[must_use]
    pub fn append(self, other: Self) -> Self {
        Self::from_stream(self.inner.chain(other.inner))
    }

    /// Returns a stream yielding only messages with `playhead >= playhead`.
    #[must_use]
    pub fn from_playhead(self, playhead: u64) -> Self {
        Self::from_stream(
            self.inner
                .try_filter(move |message| future::ready(message.playhead >= playhead)),
        )
    }

    /// Returns a stream with `f` applied to every message.
    #[must_use]
    pub fn map_messages<F>(self, mut f: F) -> Self
    where
        F: FnMut(DomainMessage<E>) -> DomainMessage<E> + Send + 'static,
    {
        Self::from_stream(self.inner.map_ok(move |message| f(message)))
    }

    /// Returns a stream with a fallible `f` applied to every message.
    ///
    /// The first `Err` returned by `f` terminates the stream.
    #[must_use]
    pub fn try_map_messages<F>(self, mut f: F) -> Self
    where
        F: FnMut(DomainMessage<E>) -> StreamItem<E> + Send + 'static,
    {
        Self::from_stream(self.inner.map(move |item| item.and_then(&mut f)))
    }

    /// Returns a stream that calls `f` on every message as it passes through.
    #[must_use]
    pub fn inspect_messages<F>(self, mut f: F) -> Self
    where
        F: FnMut(&DomainMessage<E>) + Send + 'static,
    {
        Self::from_stream(self.inner.inspect_ok(move |message| f(message)))
    }

    /// Consumes the stream into an ordered list.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the stream.
    pub async fn try_collect_messages(self) -> Result<Vec<DomainMessage<E>>, DomainError> {
        self.inner.try_collect().await
    }

    /// Consumes the stream into a restartable, in-memory stream.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the stream.
    pub async fn materialize(self) -> Result<MaterializedEventStream<E>, DomainError> {
        Ok(MaterializedEventStream::from(self.try_collect_messages().await?))
    }
}

impl<E> Stream for DomainEventStream<E> {
    type Item = StreamItem<E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<E> fmt::Debug for DomainEventStream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEventStream").finish_non_exhaustive()
    }
}

/// Finite, in-memory, restartable sequence of domain messages.
#[derive(Debug)]
pub struct MaterializedEventStream<E> {
    messages: Arc<[DomainMessage<E>]>,
}

impl<E> Clone for MaterializedEventStream<E> {
    fn clone(&self) -> Self {
        Self {
            messages: Arc::clone(&self.messages),
        }
    }
}

impl<E> MaterializedEventStream<E> {
    /// Returns the messages in order.
    #[must_use]
    pub fn messages(&self) -> &[DomainMessage<E>] {
        &self.messages
    }

    /// Returns the number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<E> MaterializedEventStream<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Starts a fresh single-consumption stream over the same messages.
    #[must_use]
    pub fn stream(&self) -> DomainEventStream<E> {
        let messages = Arc::clone(&self.messages);
        let len = messages.len();
        DomainEventStream::from_stream(stream::iter(
            (0..len).map(move |index| Ok(messages[index].clone())),
        ))
    }
}

impl<E> From<Vec<DomainMessage<E>>> for MaterializedEventStream<E> {
    fn from(messages: Vec<DomainMessage<E>>) -> Self {
        Self {
            messages: messages.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::fixtures::TestEvent;
    use crate::identity::Identity;

    fn message(id: &str, playhead: u64) -> DomainMessage<TestEvent> {
        DomainMessage::record_now(Identity::new(id), playhead, TestEvent::Ignored)
    }

    fn playheads(messages: &[DomainMessage<TestEvent>]) -> Vec<u64> {
        messages.iter().map(|m| m.playhead).collect()
    }

    #[tokio::test]
    async fn test_append_yields_all_of_first_then_all_of_second() {
        let first = DomainEventStream::of(vec![message("a", 0), message("a", 1)]);
        let second = DomainEventStream::of(vec![message("b", 0), message("b", 1)]);

        let combined = first.append(second).try_collect_messages().await.unwrap();

        let ids: Vec<&str> = combined.iter().map(|m| m.aggregate_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "a", "b", "b"]);
        assert_eq!(playheads(&combined), vec![0, 1, 0, 1]);
    }

    #[tokio::test]
    async fn test_from_playhead_filters_lower_playheads_preserving_order() {
        let stream = DomainEventStream::of((0..4).map(|p| message("a", p)).collect());

        let filtered = stream.from_playhead(2).try_collect_messages().await.unwrap();

        assert_eq!(playheads(&filtered), vec![2, 3]);
    }

    #[tokio::test]
    async fn test_stream_terminates_after_first_error() {
        let producer = stream::iter(vec![
            Ok(message("a", 0)),
            Err(DomainError::Infrastructure("disk gone".into())),
            Ok(message("a", 1)),
        ]);
        let stream = DomainEventStream::from_stream(producer);

        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(DomainError::Infrastructure(_))));
    }

    #[tokio::test]
    async fn test_error_in_first_stream_does_not_continue_into_appended_stream() {
        let failing = DomainEventStream::<TestEvent>::failed(DomainError::Infrastructure(
            "boom".into(),
        ));
        let other = DomainEventStream::of(vec![message("b", 0)]);

        let items: Vec<_> = failing.append(other).collect().await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_materialized_stream_can_be_replayed() {
        let materialized = DomainEventStream::of(vec![message("a", 0), message("a", 1)])
            .materialize()
            .await
            .unwrap();

        let first = materialized.stream().try_collect_messages().await.unwrap();
        let second = materialized.stream().try_collect_messages().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(materialized.len(), 2);
    }

    #[tokio::test]
    async fn test_map_messages_produces_new_messages() {
        let stream = DomainEventStream::of(vec![message("a", 0)]);

        let mapped = stream
            .map_messages(|m| {
                let recorded_on = m.recorded_on;
                m.with_recorded_on(recorded_on + chrono::Duration::days(1))
            })
            .try_collect_messages()
            .await
            .unwrap();

        assert_eq!(mapped.len(), 1);
    }
}
