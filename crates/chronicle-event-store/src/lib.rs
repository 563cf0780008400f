//! Chronicle Event Store: durable `EventStore` implementations.
//!
//! [`file::FileEventStore`] keeps every message in one JSON file and
//! [`pg_event_store::PgEventStore`] stores them in `PostgreSQL`.
//! [`config::open_event_store`] picks one from the environment.

pub mod config;
pub mod file;
pub mod pg_event_store;
pub mod schema;
