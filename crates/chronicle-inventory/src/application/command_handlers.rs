//! Command handlers for the Inventory context.
//!
//! Each handler loads the aggregate through the repository, runs the domain
//! method and saves, which appends the new events and publishes them.

use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::command::{CommandHandler, SimpleCommandBus};
use chronicle_core::error::DomainError;
use chronicle_core::identity::Identity;
use chronicle_core::repository::Repository;
use tracing::{info, instrument};

use crate::domain::aggregates::Inventory;
use crate::domain::commands::{AddItem, EquipItem, OpenInventory, RemoveItem};

/// Handles every inventory command against one repository.
pub struct InventoryCommandHandler {
    repository: Arc<dyn Repository<Inventory>>,
}

impl InventoryCommandHandler {
    /// Creates a handler saving through `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn Repository<Inventory>>) -> Self {
        Self { repository }
    }

    /// Registers this handler for all four inventory commands.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if any of the commands
    /// already has a handler on `bus`.
    pub fn register(self: Arc<Self>, bus: &SimpleCommandBus) -> Result<(), DomainError> {
        bus.register::<OpenInventory, _>(Arc::clone(&self))?;
        bus.register::<AddItem, _>(Arc::clone(&self))?;
        bus.register::<RemoveItem, _>(Arc::clone(&self))?;
        bus.register::<EquipItem, _>(self)
    }

    async fn update(
        &self,
        inventory: &Identity,
        change: impl FnOnce(&mut Inventory) -> Result<(), DomainError> + Send,
    ) -> Result<(), DomainError> {
        let mut aggregate = self.repository.load(inventory).await?;
        change(&mut aggregate)?;
        self.repository.save(&mut aggregate).await
    }
}

impl std::fmt::Debug for InventoryCommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryCommandHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandHandler<OpenInventory> for InventoryCommandHandler {
    #[instrument(skip(self), fields(inventory_id = %command.inventory_id))]
    async fn handle(&self, command: OpenInventory) -> Result<(), DomainError> {
        if self.repository.has(&command.inventory_id).await? {
            return Err(DomainError::Validation(format!(
                "inventory {} is already open",
                command.inventory_id
            )));
        }
        let mut inventory = Inventory::new(command.inventory_id);
        inventory.open(&command.owner)?;
        self.repository.save(&mut inventory).await?;
        info!(owner = %command.owner, "opened inventory");
        Ok(())
    }
}

#[async_trait]
impl CommandHandler<AddItem> for InventoryCommandHandler {
    #[instrument(skip(self), fields(inventory_id = %command.inventory_id))]
    async fn handle(&self, command: AddItem) -> Result<(), DomainError> {
        self.update(&command.inventory_id, |inventory| {
            inventory.add_item(command.item_id, command.quantity)
        })
        .await
    }
}

#[async_trait]
impl CommandHandler<RemoveItem> for InventoryCommandHandler {
    #[instrument(skip(self), fields(inventory_id = %command.inventory_id))]
    async fn handle(&self, command: RemoveItem) -> Result<(), DomainError> {
        self.update(&command.inventory_id, |inventory| {
            inventory.remove_item(command.item_id, command.quantity)
        })
        .await
    }
}

#[async_trait]
impl CommandHandler<EquipItem> for InventoryCommandHandler {
    #[instrument(skip(self), fields(inventory_id = %command.inventory_id))]
    async fn handle(&self, command: EquipItem) -> Result<(), DomainError> {
        self.update(&command.inventory_id, |inventory| {
            inventory.equip_item(command.item_id)
        })
        .await
    }
}
