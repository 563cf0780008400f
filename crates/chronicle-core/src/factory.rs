//! Aggregate construction from history.

use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;
use crate::identity::Identity;
use crate::stream::DomainEventStream;

/// Builds an aggregate from its identity and historical events.
#[async_trait]
pub trait AggregateFactory<A: AggregateRoot>: Send + Sync {
    /// Creates the aggregate and replays `stream` into it.
    async fn create(
        &self,
        aggregate_id: Identity,
        stream: DomainEventStream<A::Event>,
    ) -> Result<A, DomainError>;
}

/// Factory that calls [`AggregateRoot::new`] then
/// [`AggregateRoot::initialize_state`].
pub struct SimpleAggregateFactory<A> {
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> SimpleAggregateFactory<A> {
    /// Creates the factory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _aggregate: PhantomData,
        }
    }
}

impl<A> Default for SimpleAggregateFactory<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for SimpleAggregateFactory<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SimpleAggregateFactory")
    }
}

#[async_trait]
impl<A: AggregateRoot> AggregateFactory<A> for SimpleAggregateFactory<A> {
    async fn create(
        &self,
        aggregate_id: Identity,
        stream: DomainEventStream<A::Event>,
    ) -> Result<A, DomainError> {
        let mut aggregate = A::new(aggregate_id);
        aggregate.initialize_state(stream).await?;
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::fixtures::Named;

    #[tokio::test]
    async fn test_create_replays_history_into_new_aggregate() {
        // Arrange
        let mut source = Named::create("n-1", "first");
        source.rename("second");
        let history = source.get_uncommitted_events();
        let factory = SimpleAggregateFactory::<Named>::new();

        // Act
        let aggregate = factory.create(Identity::new("n-1"), history).await.unwrap();

        // Assert
        assert_eq!(aggregate.playhead(), 1);
        assert_eq!(aggregate.name.as_deref(), Some("second"));
        assert!(!aggregate.has_uncommitted_events());
    }
}
