//! Projection maintaining [`InventoryView`] read models from the event bus.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chronicle_core::bus::EventListener;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainMessage;
use chronicle_core::identity::Identity;
use chronicle_core::read_model::{ReadModel, ReadModelRepository};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::events::{
    INVENTORY_OPENED_EVENT_TYPE, ITEM_ADDED_EVENT_TYPE, ITEM_EQUIPPED_EVENT_TYPE,
    ITEM_REMOVED_EVENT_TYPE, InventoryEvent,
};

/// One line of an [`InventoryView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLine {
    /// How many are held.
    pub quantity: u32,
    /// Whether the item is equipped.
    pub equipped: bool,
}

/// Read-only view of an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryView {
    /// The inventory identifier.
    pub inventory_id: Identity,
    /// Who the inventory belongs to.
    pub owner: String,
    /// Held items, sorted by id.
    pub items: BTreeMap<Uuid, ItemLine>,
    /// Playhead of the last message projected.
    pub playhead: u64,
}

impl ReadModel for InventoryView {
    fn id(&self) -> &Identity {
        &self.inventory_id
    }
}

/// Keeps one [`InventoryView`] per inventory in step with its events.
pub struct InventoryProjector {
    views: Arc<dyn ReadModelRepository<InventoryView>>,
}

impl InventoryProjector {
    /// Creates a projector writing to `views`.
    #[must_use]
    pub fn new(views: Arc<dyn ReadModelRepository<InventoryView>>) -> Self {
        Self { views }
    }
}

#[async_trait]
impl EventListener<InventoryEvent> for InventoryProjector {
    fn handled_event_types(&self) -> &'static [&'static str] {
        &[
            INVENTORY_OPENED_EVENT_TYPE,
            ITEM_ADDED_EVENT_TYPE,
            ITEM_REMOVED_EVENT_TYPE,
            ITEM_EQUIPPED_EVENT_TYPE,
        ]
    }

    async fn handle(&self, message: &DomainMessage<InventoryEvent>) -> Result<(), DomainError> {
        let id = &message.aggregate_id;
        let mut view = match &message.payload {
            InventoryEvent::InventoryOpened(opened) => InventoryView {
                inventory_id: id.clone(),
                owner: opened.owner.clone(),
                items: BTreeMap::new(),
                playhead: message.playhead,
            },
            InventoryEvent::ItemAdded(added) => {
                let mut view = self.views.get(id).await?;
                let line = view.items.entry(added.item_id).or_insert(ItemLine {
                    quantity: 0,
                    equipped: false,
                });
                line.quantity = line.quantity.saturating_add(added.quantity);
                view
            }
            InventoryEvent::ItemRemoved(removed) => {
                let mut view = self.views.get(id).await?;
                if let Some(line) = view.items.get_mut(&removed.item_id) {
                    line.quantity = line.quantity.saturating_sub(removed.quantity);
                    if line.quantity == 0 {
                        view.items.remove(&removed.item_id);
                    }
                }
                view
            }
            InventoryEvent::ItemEquipped(equipped) => {
                let mut view = self.views.get(id).await?;
                if let Some(line) = view.items.get_mut(&equipped.item_id) {
                    line.equipped = true;
                }
                view
            }
        };
        view.playhead = message.playhead;
        debug!(inventory_id = %id, playhead = message.playhead, "projected inventory");
        self.views.save(view).await
    }
}

#[cfg(test)]
mod tests {
    use chronicle_core::read_model::InMemoryReadModelRepository;

    use super::*;
    use crate::domain::events::{InventoryOpened, ItemAdded, ItemEquipped, ItemRemoved};

    fn message(playhead: u64, event: InventoryEvent) -> DomainMessage<InventoryEvent> {
        DomainMessage::record_now(Identity::new("inv-1"), playhead, event)
    }

    #[tokio::test]
    async fn test_projector_tracks_quantities_and_equipment() {
        // Arrange
        let views = Arc::new(InMemoryReadModelRepository::<InventoryView>::new());
        let projector = InventoryProjector::new(views.clone());
        let sword = Uuid::new_v4();
        let potion = Uuid::new_v4();
        let history = vec![
            InventoryEvent::InventoryOpened(InventoryOpened { owner: "alice".into() }),
            InventoryEvent::ItemAdded(ItemAdded { item_id: sword, quantity: 1 }),
            InventoryEvent::ItemAdded(ItemAdded { item_id: potion, quantity: 3 }),
            InventoryEvent::ItemEquipped(ItemEquipped { item_id: sword }),
            InventoryEvent::ItemRemoved(ItemRemoved { item_id: potion, quantity: 3 }),
        ];

        // Act
        for (playhead, event) in (0..).zip(history) {
            projector.handle(&message(playhead, event)).await.unwrap();
        }

        // Assert
        let view = views.get(&Identity::new("inv-1")).await.unwrap();
        assert_eq!(view.owner, "alice");
        assert_eq!(view.playhead, 4);
        assert_eq!(view.items.len(), 1);
        assert_eq!(
            view.items[&sword],
            ItemLine {
                quantity: 1,
                equipped: true
            }
        );
    }

    #[tokio::test]
    async fn test_projecting_past_stack_limit_saturates() {
        // Arrange
        let views = Arc::new(InMemoryReadModelRepository::<InventoryView>::new());
        let projector = InventoryProjector::new(views.clone());
        let arrows = Uuid::new_v4();
        let history = vec![
            InventoryEvent::InventoryOpened(InventoryOpened { owner: "alice".into() }),
            InventoryEvent::ItemAdded(ItemAdded { item_id: arrows, quantity: u32::MAX }),
            InventoryEvent::ItemAdded(ItemAdded { item_id: arrows, quantity: 1 }),
        ];

        // Act
        for (playhead, event) in (0..).zip(history) {
            projector.handle(&message(playhead, event)).await.unwrap();
        }

        // Assert
        let view = views.get(&Identity::new("inv-1")).await.unwrap();
        assert_eq!(view.items[&arrows].quantity, u32::MAX);
        assert_eq!(view.playhead, 2);
    }

    #[tokio::test]
    async fn test_item_event_for_unknown_inventory_fails() {
        let views = Arc::new(InMemoryReadModelRepository::<InventoryView>::new());
        let projector = InventoryProjector::new(views);

        let result = projector
            .handle(&message(
                1,
                InventoryEvent::ItemAdded(ItemAdded {
                    item_id: Uuid::new_v4(),
                    quantity: 1,
                }),
            ))
            .await;

        assert!(matches!(result, Err(DomainError::ModelNotFound(_))));
    }
}
