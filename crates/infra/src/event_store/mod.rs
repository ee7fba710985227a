//! Append-only event store boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading tenant-scoped event streams, plus the in-memory and Postgres
//! backends.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::EventFilter;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
