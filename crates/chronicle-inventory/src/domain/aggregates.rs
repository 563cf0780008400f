//! Aggregate roots for the Inventory context.

use chronicle_core::aggregate::{AggregateRoot, EventRecorder, EventSourcedEntity};
use chronicle_core::error::DomainError;
use chronicle_core::identity::Identity;
use uuid::Uuid;

use super::events::{InventoryEvent, InventoryOpened, ItemAdded, ItemEquipped, ItemRemoved};

/// One kind of item held in an inventory.
///
/// Stacks are child entities of [`Inventory`]: they see every event after
/// the root has handled it and react only to events for their own item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStack {
    item_id: Uuid,
    quantity: u32,
    equipped: bool,
}

impl ItemStack {
    fn new(item_id: Uuid) -> Self {
        Self {
            item_id,
            quantity: 0,
            equipped: false,
        }
    }

    /// The item identifier.
    #[must_use]
    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    /// How many of the item are held.
    #[must_use]
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Whether the item is equipped.
    #[must_use]
    pub fn is_equipped(&self) -> bool {
        self.equipped
    }
}

impl EventSourcedEntity for ItemStack {
    type Event = InventoryEvent;

    fn handle(&mut self, event: &InventoryEvent) {
        match event {
            InventoryEvent::ItemAdded(added) if added.item_id == self.item_id => {
                self.quantity = self.quantity.saturating_add(added.quantity);
            }
            InventoryEvent::ItemRemoved(removed) if removed.item_id == self.item_id => {
                self.quantity = self.quantity.saturating_sub(removed.quantity);
            }
            InventoryEvent::ItemEquipped(equipped) if equipped.item_id == self.item_id => {
                self.equipped = true;
            }
            _ => {}
        }
    }
}

/// The aggregate root for an inventory.
#[derive(Debug, Clone)]
pub struct Inventory {
    recorder: EventRecorder<InventoryEvent>,
    owner: Option<String>,
    stacks: Vec<ItemStack>,
}

impl Inventory {
    /// Returns the owner, or `None` before the inventory is opened.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns the held stacks in the order items were first added.
    #[must_use]
    pub fn stacks(&self) -> &[ItemStack] {
        &self.stacks
    }

    /// Returns the stack for `item_id`, if any is held.
    #[must_use]
    pub fn stack(&self, item_id: Uuid) -> Option<&ItemStack> {
        self.stacks.iter().find(|stack| stack.item_id == item_id)
    }

    /// Opens the inventory for `owner`, producing an `InventoryOpened` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the inventory is already open or
    /// `owner` is blank.
    pub fn open(&mut self, owner: &str) -> Result<(), DomainError> {
        if self.owner.is_some() {
            return Err(DomainError::Validation(format!(
                "inventory {} is already open",
                self.aggregate_id()
            )));
        }
        if owner.trim().is_empty() {
            return Err(DomainError::Validation("owner must not be blank".into()));
        }
        self.apply(InventoryEvent::InventoryOpened(InventoryOpened {
            owner: owner.to_owned(),
        }));
        Ok(())
    }

    /// Adds `quantity` of an item, producing an `ItemAdded` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the inventory is not open,
    /// `quantity` is zero, or the stack would exceed `u32::MAX`.
    pub fn add_item(&mut self, item_id: Uuid, quantity: u32) -> Result<(), DomainError> {
        self.ensure_open()?;
        if quantity == 0 {
            return Err(DomainError::Validation("quantity must be positive".into()));
        }
        let held = self.stack(item_id).map_or(0, ItemStack::quantity);
        if held.checked_add(quantity).is_none() {
            return Err(DomainError::Validation(format!(
                "cannot add {quantity} of item {item_id} to inventory {}: {held} held",
                self.aggregate_id()
            )));
        }
        self.apply(InventoryEvent::ItemAdded(ItemAdded { item_id, quantity }));
        Ok(())
    }

    /// Removes `quantity` of an item, producing an `ItemRemoved` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if fewer than `quantity` are held.
    pub fn remove_item(&mut self, item_id: Uuid, quantity: u32) -> Result<(), DomainError> {
        let held = self.stack(item_id).map_or(0, ItemStack::quantity);
        if quantity == 0 || quantity > held {
            return Err(DomainError::Validation(format!(
                "cannot remove {quantity} of item {item_id} from inventory {}: {held} held",
                self.aggregate_id()
            )));
        }
        self.apply(InventoryEvent::ItemRemoved(ItemRemoved { item_id, quantity }));
        Ok(())
    }

    /// Equips an item, producing an `ItemEquipped` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item is not in the inventory.
    pub fn equip_item(&mut self, item_id: Uuid) -> Result<(), DomainError> {
        if self.stack(item_id).is_none() {
            return Err(DomainError::Validation(format!(
                "item {item_id} not found in inventory {}",
                self.aggregate_id()
            )));
        }
        self.apply(InventoryEvent::ItemEquipped(ItemEquipped { item_id }));
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.owner.is_none() {
            return Err(DomainError::Validation(format!(
                "inventory {} is not open",
                self.aggregate_id()
            )));
        }
        Ok(())
    }
}

impl EventSourcedEntity for Inventory {
    type Event = InventoryEvent;

    // Stacks are created and dropped here; their quantities change in
    // `ItemStack::handle`, which runs after this.
    fn handle(&mut self, event: &InventoryEvent) {
        match event {
            InventoryEvent::InventoryOpened(opened) => {
                self.owner = Some(opened.owner.clone());
            }
            InventoryEvent::ItemAdded(added) => {
                if self.stack(added.item_id).is_none() {
                    self.stacks.push(ItemStack::new(added.item_id));
                }
            }
            InventoryEvent::ItemRemoved(removed) => {
                self.stacks.retain(|stack| {
                    stack.item_id != removed.item_id || stack.quantity > removed.quantity
                });
            }
            InventoryEvent::ItemEquipped(_) => {}
        }
    }

    fn child_entities(&mut self) -> Vec<&mut dyn EventSourcedEntity<Event = InventoryEvent>> {
        self.stacks
            .iter_mut()
            .map(|stack| stack as &mut dyn EventSourcedEntity<Event = InventoryEvent>)
            .collect()
    }
}

impl AggregateRoot for Inventory {
    fn new(aggregate_id: Identity) -> Self {
        Self {
            recorder: EventRecorder::new(aggregate_id),
            owner: None,
            stacks: Vec::new(),
        }
    }

    fn recorder(&self) -> &EventRecorder<InventoryEvent> {
        &self.recorder
    }

    fn recorder_mut(&mut self) -> &mut EventRecorder<InventoryEvent> {
        &mut self.recorder
    }
}
