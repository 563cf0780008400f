//! Wiring for the Inventory context.

use std::fmt;
use std::sync::Arc;

use chronicle_core::bus::{AsynchronousDomainEventBus, DomainEventBus};
use chronicle_core::command::{Command, SimpleCommandBus};
use chronicle_core::decorator::MetadataDecorator;
use chronicle_core::error::DomainError;
use chronicle_core::event::Metadata;
use chronicle_core::query::{Query, SimpleQueryBus};
use chronicle_core::read_model::{InMemoryReadModelRepository, ReadModelRepository};
use chronicle_core::replay::ReplayService;
use chronicle_core::repository::EventSourcingRepository;
use chronicle_core::store::EventStore;
use tracing::info;

use crate::application::command_handlers::InventoryCommandHandler;
use crate::application::projector::{InventoryProjector, InventoryView};
use crate::application::query_handlers::InventoryQueryHandler;
use crate::domain::aggregates::Inventory;
use crate::domain::events::InventoryEvent;

/// The Inventory context assembled over an event store.
///
/// Owns the buses, the repository and the projection. Every saved event is
/// stamped with the current metadata variables before it is stored.
pub struct InventoryModule {
    store: Arc<dyn EventStore<InventoryEvent>>,
    commands: SimpleCommandBus,
    queries: SimpleQueryBus,
    events: AsynchronousDomainEventBus<InventoryEvent>,
    metadata: Arc<MetadataDecorator>,
}

impl InventoryModule {
    /// Assembles the context over `store`, keeping views in memory.
    ///
    /// # Errors
    ///
    /// Returns any error raised while registering handlers or subscribing
    /// the projector.
    pub fn new(store: Arc<dyn EventStore<InventoryEvent>>) -> Result<Self, DomainError> {
        let views: Arc<dyn ReadModelRepository<InventoryView>> =
            Arc::new(InMemoryReadModelRepository::<InventoryView>::new());
        Self::with_views(store, views)
    }

    /// Assembles the context over `store`, projecting into `views`.
    ///
    /// # Errors
    ///
    /// Returns any error raised while registering handlers or subscribing
    /// the projector.
    pub fn with_views(
        store: Arc<dyn EventStore<InventoryEvent>>,
        views: Arc<dyn ReadModelRepository<InventoryView>>,
    ) -> Result<Self, DomainError> {
        let events = AsynchronousDomainEventBus::<InventoryEvent>::new();
        events.subscribe(Arc::new(InventoryProjector::new(Arc::clone(&views))))?;

        let metadata = Arc::new(MetadataDecorator::new(Metadata::new()));
        let bus: Arc<dyn DomainEventBus<InventoryEvent>> = Arc::new(events.clone());
        let repository = EventSourcingRepository::<Inventory>::new(Arc::clone(&store), bus)
            .with_decorator(metadata.clone());

        let commands = SimpleCommandBus::new();
        Arc::new(InventoryCommandHandler::new(Arc::new(repository))).register(&commands)?;
        let queries = SimpleQueryBus::new();
        Arc::new(InventoryQueryHandler::new(views)).register(&queries)?;

        info!("inventory module ready");
        Ok(Self {
            store,
            commands,
            queries,
            events,
            metadata,
        })
    }

    /// Replaces the metadata stamped onto subsequently saved events.
    pub fn set_metadata(&self, variables: Metadata) {
        self.metadata.set_variables(variables);
    }

    /// Dispatches an inventory command.
    ///
    /// # Errors
    ///
    /// Returns whatever the command handler returns.
    pub async fn execute<C: Command>(&self, command: C) -> Result<(), DomainError> {
        self.commands.dispatch(command).await
    }

    /// Waits for pending projections, then answers `query`.
    ///
    /// # Errors
    ///
    /// Returns the first projection failure, if any, otherwise whatever the
    /// query handler returns.
    pub async fn ask<Q: Query>(&self, query: Q) -> Result<Q::Output, DomainError> {
        self.events.try_until_idle().await?;
        self.queries.dispatch(query).await
    }

    /// Replays every stored event through the projector and returns how many
    /// were replayed. Views for inventories already projected are rebuilt in
    /// place.
    ///
    /// # Errors
    ///
    /// Returns the store error that ended the replay early, or the first
    /// projection failure.
    pub async fn rebuild_views(&self) -> Result<usize, DomainError> {
        let replayed = ReplayService::new(Arc::clone(&self.store), self.events.clone())
            .replay()
            .await;
        let projected = self.events.try_until_idle().await;
        let count = replayed?;
        projected?;
        Ok(count)
    }

    /// Returns the event bus the projector listens on.
    #[must_use]
    pub fn events(&self) -> &AsynchronousDomainEventBus<InventoryEvent> {
        &self.events
    }
}

impl fmt::Debug for InventoryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InventoryModule")
            .field("commands", &self.commands)
            .field("queries", &self.queries)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
