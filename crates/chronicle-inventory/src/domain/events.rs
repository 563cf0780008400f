//! Domain events for the Inventory context.

use chronicle_core::event::DomainEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type name for `InventoryOpened`.
pub const INVENTORY_OPENED_EVENT_TYPE: &str = "inventory.opened";
/// Event type name for `ItemAdded`.
pub const ITEM_ADDED_EVENT_TYPE: &str = "inventory.item_added";
/// Event type name for `ItemRemoved`.
pub const ITEM_REMOVED_EVENT_TYPE: &str = "inventory.item_removed";
/// Event type name for `ItemEquipped`.
pub const ITEM_EQUIPPED_EVENT_TYPE: &str = "inventory.item_equipped";

/// Emitted when an inventory is opened for an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryOpened {
    /// Who the inventory belongs to.
    pub owner: String,
}

/// Emitted when items are added to an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// The item identifier.
    pub item_id: Uuid,
    /// How many were added.
    pub quantity: u32,
}

/// Emitted when items are removed from an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    /// The item identifier.
    pub item_id: Uuid,
    /// How many were removed.
    pub quantity: u32,
}

/// Emitted when an item is equipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEquipped {
    /// The item identifier.
    pub item_id: Uuid,
}

/// Every event of the Inventory context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    /// The inventory has been opened.
    InventoryOpened(InventoryOpened),
    /// Items have been added.
    ItemAdded(ItemAdded),
    /// Items have been removed.
    ItemRemoved(ItemRemoved),
    /// An item has been equipped.
    ItemEquipped(ItemEquipped),
}

impl DomainEvent for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::InventoryOpened(_) => INVENTORY_OPENED_EVENT_TYPE,
            Self::ItemAdded(_) => ITEM_ADDED_EVENT_TYPE,
            Self::ItemRemoved(_) => ITEM_REMOVED_EVENT_TYPE,
            Self::ItemEquipped(_) => ITEM_EQUIPPED_EVENT_TYPE,
        }
    }
}
