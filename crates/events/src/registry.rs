//! Versioned event-type registry.
//!
//! Maps `(aggregate_type, event_type, schema_version)` to a decoder that turns
//! a stored JSON payload into the aggregate's typed event. Registries are built
//! once at start-up and only read afterwards; an entry must never be removed
//! while events of that type exist in the log, otherwise replay breaks.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::envelope::{EventEnvelope, RawEvent};

type DecodeFn<E> = Box<dyn Fn(&JsonValue) -> Result<E, serde_json::Error> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    aggregate_type: String,
    event_type: String,
    schema_version: u32,
}

/// Registry / decoding failure.
///
/// Always an internal fault: it means the code running does not match the data
/// in the log, which cannot be repaired by retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("decoder already registered for {aggregate_type}/{event_type} v{schema_version}")]
    DuplicateRegistration {
        aggregate_type: String,
        event_type: String,
        schema_version: u32,
    },

    #[error("no decoder registered for {aggregate_type}/{event_type} v{schema_version}")]
    UnknownEventType {
        aggregate_type: String,
        event_type: String,
        schema_version: u32,
    },

    #[error("malformed payload for {event_type} v{schema_version}: {reason}")]
    MalformedPayload {
        event_type: String,
        schema_version: u32,
        reason: String,
    },
}

/// Decoders for the events of one aggregate's typed event enum `E`.
pub struct EventRegistry<E> {
    decoders: HashMap<RegistryKey, DecodeFn<E>>,
}

impl<E> core::fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut keys: Vec<_> = self.decoders.keys().collect();
        keys.sort_by(|a, b| {
            (&a.aggregate_type, &a.event_type, a.schema_version).cmp(&(
                &b.aggregate_type,
                &b.event_type,
                b.schema_version,
            ))
        });
        f.debug_struct("EventRegistry").field("keys", &keys).finish()
    }
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<E: 'static> EventRegistry<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder. Fails if the key is already taken.
    pub fn register<F>(
        &mut self,
        aggregate_type: &str,
        event_type: &str,
        schema_version: u32,
        decoder: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&JsonValue) -> Result<E, serde_json::Error> + Send + Sync + 'static,
    {
        let key = RegistryKey {
            aggregate_type: aggregate_type.to_string(),
            event_type: event_type.to_string(),
            schema_version,
        };
        if self.decoders.contains_key(&key) {
            return Err(RegistryError::DuplicateRegistration {
                aggregate_type: key.aggregate_type,
                event_type: key.event_type,
                schema_version,
            });
        }
        self.decoders.insert(key, Box::new(decoder));
        Ok(())
    }

    /// Register a serde decoder for payload struct `P`, wrapped into `E`.
    ///
    /// `P` should mark every field added after the first schema version with
    /// `#[serde(default)]`, so payloads written by older code still decode.
    pub fn register_payload<P>(
        &mut self,
        aggregate_type: &str,
        event_type: &str,
        schema_version: u32,
        wrap: fn(P) -> E,
    ) -> Result<(), RegistryError>
    where
        P: DeserializeOwned + 'static,
    {
        self.register(aggregate_type, event_type, schema_version, move |value| {
            P::deserialize(value).map(wrap)
        })
    }

    pub fn contains(&self, aggregate_type: &str, event_type: &str, schema_version: u32) -> bool {
        self.decoders.contains_key(&RegistryKey {
            aggregate_type: aggregate_type.to_string(),
            event_type: event_type.to_string(),
            schema_version,
        })
    }

    /// Whether any schema version of `event_type` is registered.
    pub fn knows_event_type(&self, aggregate_type: &str, event_type: &str) -> bool {
        self.decoders
            .keys()
            .any(|k| k.aggregate_type == aggregate_type && k.event_type == event_type)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode a stored event into its typed form, keeping the metadata.
    pub fn decode(&self, raw: &RawEvent) -> Result<EventEnvelope<E>, RegistryError> {
        let key = RegistryKey {
            aggregate_type: raw.aggregate_type.clone(),
            event_type: raw.event_type.clone(),
            schema_version: raw.schema_version,
        };
        let decoder = self
            .decoders
            .get(&key)
            .ok_or_else(|| RegistryError::UnknownEventType {
                aggregate_type: key.aggregate_type.clone(),
                event_type: key.event_type.clone(),
                schema_version: key.schema_version,
            })?;

        // An absent payload decodes like an empty object: every field defaults.
        let empty = JsonValue::Object(Default::default());
        let payload = if raw.payload.is_null() { &empty } else { &raw.payload };

        let typed = decoder(payload).map_err(|e| RegistryError::MalformedPayload {
            event_type: raw.event_type.clone(),
            schema_version: raw.schema_version,
            reason: e.to_string(),
        })?;
        Ok(raw.with_payload(typed))
    }
}
