//! Query handlers for the Inventory context, answered from read models.

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::identity::Identity;
use chronicle_core::query::{Query, QueryHandler, SimpleQueryBus};
use chronicle_core::read_model::ReadModelRepository;

use super::projector::InventoryView;

/// Fetches one inventory's view.
#[derive(Debug, Clone)]
pub struct GetInventory {
    /// The inventory identifier.
    pub inventory_id: Identity,
}

impl Query for GetInventory {
    const QUERY_TYPE: &'static str = "inventory.get_inventory";
    type Output = InventoryView;
}

/// Lists every inventory belonging to an owner.
#[derive(Debug, Clone)]
pub struct ListInventoriesByOwner {
    /// The owner to match.
    pub owner: String,
}

impl Query for ListInventoriesByOwner {
    const QUERY_TYPE: &'static str = "inventory.list_by_owner";
    type Output = Vec<InventoryView>;
}

/// Answers inventory queries from the projected views.
pub struct InventoryQueryHandler {
    views: Arc<dyn ReadModelRepository<InventoryView>>,
}

impl InventoryQueryHandler {
    /// Creates a handler reading from `views`.
    #[must_use]
    pub fn new(views: Arc<dyn ReadModelRepository<InventoryView>>) -> Self {
        Self { views }
    }

    /// Registers this handler for both inventory queries.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if either query
    /// already has a handler on `bus`.
    pub fn register(self: Arc<Self>, bus: &SimpleQueryBus) -> Result<(), DomainError> {
        bus.register::<GetInventory, _>(Arc::clone(&self))?;
        bus.register::<ListInventoriesByOwner, _>(self)
    }
}

#[async_trait]
impl QueryHandler<GetInventory> for InventoryQueryHandler {
    /// # Errors
    ///
    /// Returns `DomainError::ModelNotFound` if no view exists for the id.
    async fn handle(&self, query: GetInventory) -> Result<InventoryView, DomainError> {
        self.views.get(&query.inventory_id).await
    }
}

#[async_trait]
impl QueryHandler<ListInventoriesByOwner> for InventoryQueryHandler {
    async fn handle(&self, query: ListInventoriesByOwner) -> Result<Vec<InventoryView>, DomainError> {
        self.views
            .find_by(&|view: &InventoryView| view.owner == query.owner)
            .await
    }
}
