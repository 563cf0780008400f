//! Chronicle Inventory: a bounded context built on the Chronicle toolkit.
//!
//! Inventories hold stacks of items that can be added, removed and equipped.
//! Commands go through the command bus to the [`domain::aggregates::Inventory`]
//! aggregate; the resulting events are projected into
//! [`application::projector::InventoryView`] read models served by the query
//! bus.

pub mod application;
pub mod domain;
pub mod module;
