//! Event envelope, versioned type registry and write-model replay.

pub mod envelope;
pub mod event;
pub mod registry;
pub mod write_model;

pub use envelope::{EventEnvelope, RawEvent};
pub use event::Event;
pub use registry::{EventRegistry, RegistryError};
pub use write_model::{Reducer, WriteModel};
