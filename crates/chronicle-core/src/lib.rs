//! Chronicle Core: event-sourcing primitives.
//!
//! Aggregates mutate state only by applying domain events. The events are
//! appended to a per-aggregate log in an [`store::EventStore`] with strictly
//! sequential playheads, and then published on a [`bus::DomainEventBus`] so
//! projections can follow along. This crate contains no durable
//! infrastructure; see `chronicle-event-store` for file and `PostgreSQL`
//! backed stores.

pub mod aggregate;
pub mod bus;
pub mod clock;
pub mod command;
pub mod decorator;
pub mod error;
pub mod event;
pub mod factory;
pub mod identity;
pub mod query;
pub mod read_model;
pub mod replay;
pub mod repository;
pub mod serializer;
pub mod store;
pub mod stream;
