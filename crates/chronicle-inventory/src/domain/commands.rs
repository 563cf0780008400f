//! Commands for the Inventory context.

use chronicle_core::command::Command;
use chronicle_core::identity::Identity;
use uuid::Uuid;

/// Command to open a new inventory.
#[derive(Debug, Clone)]
pub struct OpenInventory {
    /// The inventory identifier.
    pub inventory_id: Identity,
    /// Who the inventory belongs to.
    pub owner: String,
}

impl Command for OpenInventory {
    const COMMAND_TYPE: &'static str = "inventory.open_inventory";
}

/// Command to add items to an inventory.
#[derive(Debug, Clone)]
pub struct AddItem {
    /// The inventory identifier.
    pub inventory_id: Identity,
    /// The item identifier.
    pub item_id: Uuid,
    /// How many to add.
    pub quantity: u32,
}

impl Command for AddItem {
    const COMMAND_TYPE: &'static str = "inventory.add_item";
}

/// Command to remove items from an inventory.
#[derive(Debug, Clone)]
pub struct RemoveItem {
    /// The inventory identifier.
    pub inventory_id: Identity,
    /// The item identifier.
    pub item_id: Uuid,
    /// How many to remove.
    pub quantity: u32,
}

impl Command for RemoveItem {
    const COMMAND_TYPE: &'static str = "inventory.remove_item";
}

/// Command to equip an item.
#[derive(Debug, Clone)]
pub struct EquipItem {
    /// The inventory identifier.
    pub inventory_id: Identity,
    /// The item identifier.
    pub item_id: Uuid,
}

impl Command for EquipItem {
    const COMMAND_TYPE: &'static str = "inventory.equip_item";
}
