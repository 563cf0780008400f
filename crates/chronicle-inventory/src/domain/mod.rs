//! Inventory domain: the aggregate, its events and its commands.

pub mod aggregates;
pub mod commands;
pub mod events;
