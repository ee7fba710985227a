//! Infrastructure layer: event stores, the append engine and its configuration.

pub mod config;
pub mod engine;
pub mod event_store;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineError, Eventstore, Executed, RetryPolicy};
pub use event_store::{
    EventFilter, EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent,
    UncommittedEvent,
};
