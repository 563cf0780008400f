//! Aggregate repositories.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::aggregate::AggregateRoot;
use crate::bus::DomainEventBus;
use crate::decorator::{DecoratorChain, DomainEventStreamDecorator};
use crate::error::DomainError;
use crate::factory::{AggregateFactory, SimpleAggregateFactory};
use crate::identity::Identity;
use crate::store::EventStore;

/// Loads and saves aggregates.
#[async_trait]
pub trait Repository<A: AggregateRoot>: Send + Sync {
    /// Returns `true` if the aggregate has any stored history.
    async fn has(&self, id: &Identity) -> Result<bool, DomainError>;

    /// Rebuilds the aggregate from its history.
    async fn load(&self, id: &Identity) -> Result<A, DomainError>;

    /// Persists and publishes the aggregate's uncommitted events.
    async fn save(&self, aggregate: &mut A) -> Result<(), DomainError>;
}

/// Repository backed by an event store and an event bus.
///
/// Saving drains the aggregate, runs the events through the decorator,
/// appends them and, only if the append succeeds, publishes the very same
/// messages.
pub struct EventSourcingRepository<A: AggregateRoot> {
    store: Arc<dyn EventStore<A::Event>>,
    bus: Arc<dyn DomainEventBus<A::Event>>,
    factory: Arc<dyn AggregateFactory<A>>,
    decorator: Arc<dyn DomainEventStreamDecorator<A::Event>>,
}

impl<A: AggregateRoot> EventSourcingRepository<A> {
    /// Creates a repository with the simple factory and no decoration.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore<A::Event>>,
        bus: Arc<dyn DomainEventBus<A::Event>>,
    ) -> Self {
        Self {
            store,
            bus,
            factory: Arc::new(SimpleAggregateFactory::<A>::new()),
            decorator: Arc::new(DecoratorChain::default()),
        }
    }

    /// Replaces the aggregate factory.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn AggregateFactory<A>>) -> Self {
        self.factory = factory;
        self
    }

    /// Replaces the decorator applied to events before they are saved.
    #[must_use]
    pub fn with_decorator(
        mut self,
        decorator: Arc<dyn DomainEventStreamDecorator<A::Event>>,
    ) -> Self {
        self.decorator = decorator;
        self
    }
}

impl<A: AggregateRoot> fmt::Debug for EventSourcingRepository<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSourcingRepository")
            .field("aggregate", &std::any::type_name::<A>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<A: AggregateRoot> Repository<A> for EventSourcingRepository<A> {
    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        self.store.has(id).await
    }

    #[instrument(skip(self), fields(aggregate_id = %id))]
    async fn load(&self, id: &Identity) -> Result<A, DomainError> {
        let stream = self.store.load(id).await?;
        self.factory.create(id.clone(), stream).await
    }

    #[instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.aggregate_id()))]
    async fn save(&self, aggregate: &mut A) -> Result<(), DomainError> {
        if !aggregate.has_uncommitted_events() {
            debug!("nothing to save");
            return Ok(());
        }
        let uncommitted = aggregate.get_uncommitted_events();
        let messages = self
            .decorator
            .decorate(aggregate.recorder(), uncommitted)
            .materialize()
            .await?;
        if messages.is_empty() {
            debug!("decorator removed every event");
            return Ok(());
        }

        self.store
            .append(aggregate.aggregate_id(), messages.stream())
            .await?;
        self.bus.publish(messages.stream());

        info!(count = messages.len(), playhead = aggregate.playhead(), "saved aggregate");
        Ok(())
    }
}

/// Repository decorator keeping aggregates in memory after first use.
pub struct CachedRepository<A: AggregateRoot> {
    repository: Arc<dyn Repository<A>>,
    memory: RwLock<HashMap<Identity, A>>,
}

impl<A: AggregateRoot + Clone> CachedRepository<A> {
    /// Wraps `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn Repository<A>>) -> Self {
        Self {
            repository,
            memory: RwLock::new(HashMap::new()),
        }
    }

    fn remembered(&self, id: &Identity) -> Option<A> {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn remember(&self, aggregate: &A) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(aggregate.aggregate_id().clone(), aggregate.clone());
    }
}

impl<A: AggregateRoot> fmt::Debug for CachedRepository<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let memory = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CachedRepository")
            .field("cached", &memory.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<A: AggregateRoot + Clone> Repository<A> for CachedRepository<A> {
    async fn has(&self, id: &Identity) -> Result<bool, DomainError> {
        if self.remembered(id).is_some() {
            return Ok(true);
        }
        self.repository.has(id).await
    }

    async fn load(&self, id: &Identity) -> Result<A, DomainError> {
        if let Some(aggregate) = self.remembered(id) {
            return Ok(aggregate);
        }
        let aggregate = self.repository.load(id).await?;
        self.remember(&aggregate);
        Ok(aggregate)
    }

    async fn save(&self, aggregate: &mut A) -> Result<(), DomainError> {
        self.repository.save(aggregate).await?;
        self.remember(aggregate);
        Ok(())
    }
}
