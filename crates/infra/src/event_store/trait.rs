use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use sigil_core::{AggregateId, Editor, ExpectedSequence, TenantId};
use sigil_events::RawEvent;
use std::sync::Arc;

use super::query::EventFilter;

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// The store assigns `sequence` and the commit timestamp during append.
///
/// ## Event Lifecycle
///
/// 1. **Typed event**: decided by a command against the replayed write model
/// 2. **UncommittedEvent**: serialized payload + stream metadata + editor
/// 3. **StoredEvent**: persisted with assigned sequence and commit timestamp
/// 4. **Typed envelope**: decoded again through the aggregate's registry on replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub schema_version: u32,
    pub editor: Editor,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are stream-scoped (`tenant_id` + `aggregate_type` +
/// `aggregate_id`), start at 1, never change and have no gaps.
pub type StoredEvent = RawEvent;

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, isolation) as
/// opposed to domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Append-only, tenant-scoped event store.
///
/// The store is the only shared mutable resource of the system. All writes go
/// through `append`, whose compare-and-swap on the stream head is what
/// serializes concurrent writers of one aggregate.
///
/// ## Append Semantics
///
/// `append()`:
/// - Validates the batch targets a single tenant + aggregate stream
/// - Checks the stream head against `expected` (compare-and-swap)
/// - Assigns sequence numbers `head + 1 ..= head + len` and one commit timestamp
/// - Persists events atomically (all or nothing)
///
/// ## Load Semantics
///
/// `load_stream()` returns the events of one stream in sequence order, or an
/// empty vector if the aggregate was never written. Loads may be served by a
/// replica with relaxed freshness; appends always see the authoritative head.
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedSequence,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for a tenant + aggregate.
    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Filtered replay: every stream matching `filter`, each complete and in
    /// sequence order, grouped by aggregate ID (ascending).
    ///
    /// Meant for command preconditions ("does a session exist", "sessions of
    /// this creator"), not as a general query path.
    fn search(
        &self,
        tenant_id: TenantId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedSequence,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(tenant_id, aggregate_type, aggregate_id)
    }

    fn search(
        &self,
        tenant_id: TenantId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).search(tenant_id, filter)
    }
}

impl UncommittedEvent {
    /// Build an uncommitted event from a typed domain event.
    pub fn from_typed<E>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        editor: Editor,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: sigil_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            editor,
            payload,
        })
    }
}

/// Check that a batch targets exactly one tenant + aggregate stream.
///
/// Returns the stream coordinates of the batch.
pub(crate) fn validate_batch(
    events: &[UncommittedEvent],
) -> Result<(TenantId, String, AggregateId), EventStoreError> {
    let first = events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("empty batch".to_string()))?;

    for (idx, e) in events.iter().enumerate() {
        if e.tenant_id != first.tenant_id {
            return Err(EventStoreError::TenantIsolation(format!(
                "batch contains multiple tenant_ids (index {idx})"
            )));
        }
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }

    Ok((first.tenant_id, first.aggregate_type.clone(), first.aggregate_id))
}
