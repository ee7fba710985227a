use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use sigil_core::{AggregateId, Editor, TenantId};

/// A committed event with its stream metadata.
///
/// This is the unit that is persisted and replayed. `payload` is either the raw
/// self-describing JSON blob ([`RawEvent`]) or, after decoding through an
/// [`EventRegistry`](crate::EventRegistry), the aggregate's typed event.
///
/// Notes:
/// - `sequence` is assigned exactly once by the append engine and is strictly
///   increasing and contiguous per aggregate stream.
/// - `created_at` is the commit timestamp, shared by every event of one push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    pub event_id: Uuid,
    pub tenant_id: TenantId,

    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub schema_version: u32,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub editor: Editor,

    pub payload: E,
}

/// An envelope whose payload has not been decoded yet.
pub type RawEvent = EventEnvelope<JsonValue>;

impl<E> EventEnvelope<E> {
    /// Same metadata, different payload.
    pub fn with_payload<P>(&self, payload: P) -> EventEnvelope<P> {
        EventEnvelope {
            event_id: self.event_id,
            tenant_id: self.tenant_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type.clone(),
            event_type: self.event_type.clone(),
            schema_version: self.schema_version,
            sequence: self.sequence,
            created_at: self.created_at,
            editor: self.editor.clone(),
            payload,
        }
    }
}
