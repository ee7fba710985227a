use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;

use sigil_core::{AggregateId, ExpectedSequence, TenantId};

use super::query::EventFilter;
use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StreamKey {
    tenant_id: TenantId,
    aggregate_type: String,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance. The write lock makes
/// the head check and the append one atomic step.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<BTreeMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_sequence(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Total number of events across all streams.
    pub fn event_count(&self) -> usize {
        self.streams
            .read()
            .map(|s| s.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected: ExpectedSequence,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }
        let (tenant_id, aggregate_type, aggregate_id) = validate_batch(&events)?;

        let key = StreamKey {
            tenant_id,
            aggregate_type,
            aggregate_id,
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_sequence(stream);

        if !expected.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        // One commit timestamp for the whole batch.
        let created_at = Utc::now();
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            committed.push(StoredEvent {
                event_id: e.event_id,
                tenant_id: e.tenant_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                event_type: e.event_type,
                schema_version: e.schema_version,
                sequence: next,
                created_at,
                editor: e.editor,
                payload: e.payload,
            });
            next += 1;
        }
        stream.extend(committed.iter().cloned());

        Ok(committed)
    }

    fn load_stream(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            tenant_id,
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }

    fn search(
        &self,
        tenant_id: TenantId,
        filter: &EventFilter,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("lock poisoned".to_string()))?;

        let mut found = Vec::new();
        for (key, stream) in streams.iter() {
            if key.tenant_id != tenant_id
                || key.aggregate_type != filter.aggregate_type
                || !filter.matches_id(&key.aggregate_id)
            {
                continue;
            }
            let Some(first) = stream.first() else {
                continue;
            };
            if !filter.matches_creator(&first.editor.user_id) {
                continue;
            }
            found.extend(stream.iter().cloned());
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sigil_core::{Editor, UserId};
    use std::sync::{Arc, Barrier};
    use uuid::Uuid;

    fn editor(user_id: UserId) -> Editor {
        Editor {
            user_id,
            service: "test".to_string(),
        }
    }

    fn uncommitted(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        user_id: UserId,
        n: usize,
    ) -> Vec<UncommittedEvent> {
        (0..n)
            .map(|i| UncommittedEvent {
                event_id: Uuid::now_v7(),
                tenant_id,
                aggregate_id,
                aggregate_type: "thing".to_string(),
                event_type: "thing.happened".to_string(),
                schema_version: 1,
                editor: editor(user_id),
                payload: json!({ "n": i }),
            })
            .collect()
    }

    #[test]
    fn append_assigns_contiguous_sequences_and_one_timestamp() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let user = UserId::new();

        let first = store
            .append(uncommitted(tenant_id, id, user, 2), ExpectedSequence::Exact(0))
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(first[0].created_at, first[1].created_at);

        let second = store
            .append(uncommitted(tenant_id, id, user, 3), ExpectedSequence::Exact(2))
            .unwrap();
        assert_eq!(second.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4, 5]);

        let loaded = store.load_stream(tenant_id, "thing", id).unwrap();
        assert_eq!(loaded.len(), 5);
    }

    #[test]
    fn stale_expected_sequence_is_rejected_without_writing() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let user = UserId::new();

        store
            .append(uncommitted(tenant_id, id, user, 1), ExpectedSequence::Exact(0))
            .unwrap();
        let err = store
            .append(uncommitted(tenant_id, id, user, 2), ExpectedSequence::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn mixed_batches_are_rejected() {
        let store = InMemoryEventStore::new();
        let user = UserId::new();
        let mut batch = uncommitted(TenantId::new(), AggregateId::new(), user, 1);
        batch.extend(uncommitted(TenantId::new(), AggregateId::new(), user, 1));
        let err = store.append(batch, ExpectedSequence::Any).unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
        assert_eq!(store.event_count(), 0);
    }

    #[test]
    fn streams_are_tenant_scoped() {
        let store = InMemoryEventStore::new();
        let tenant_a = TenantId::new();
        let id = AggregateId::new();
        store
            .append(uncommitted(tenant_a, id, UserId::new(), 1), ExpectedSequence::Exact(0))
            .unwrap();
        assert!(store.load_stream(TenantId::new(), "thing", id).unwrap().is_empty());
    }

    #[test]
    fn concurrent_appends_with_same_expectation_have_one_winner() {
        let store = Arc::new(InMemoryEventStore::new());
        let tenant_id = TenantId::new();
        let id = AggregateId::new();
        let user = UserId::new();
        store
            .append(uncommitted(tenant_id, id, user, 1), ExpectedSequence::Exact(0))
            .unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.append(uncommitted(tenant_id, id, user, 1), ExpectedSequence::Exact(1))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(EventStoreError::Concurrency(_))))
        );

        // The loser retries against the refreshed head.
        store
            .append(uncommitted(tenant_id, id, user, 1), ExpectedSequence::Exact(2))
            .unwrap();
        let sequences: Vec<_> = store
            .load_stream(tenant_id, "thing", id)
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn search_filters_by_ids_and_creator() {
        let store = InMemoryEventStore::new();
        let tenant_id = TenantId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .append(uncommitted(tenant_id, a, alice, 2), ExpectedSequence::Exact(0))
            .unwrap();
        store
            .append(uncommitted(tenant_id, b, bob, 1), ExpectedSequence::Exact(0))
            .unwrap();
        // A later event by bob does not make him the creator of `a`.
        store
            .append(uncommitted(tenant_id, a, bob, 1), ExpectedSequence::Exact(2))
            .unwrap();

        let by_alice = store
            .search(tenant_id, &EventFilter::aggregate_type("thing").with_creator(alice))
            .unwrap();
        assert_eq!(by_alice.len(), 3);
        assert!(by_alice.iter().all(|e| e.aggregate_id == a));

        let by_id = store
            .search(tenant_id, &EventFilter::aggregate_type("thing").with_ids([b]))
            .unwrap();
        assert_eq!(by_id.len(), 1);

        let none = store
            .search(
                tenant_id,
                &EventFilter::aggregate_type("thing").with_ids([b]).with_creator(alice),
            )
            .unwrap();
        assert!(none.is_empty());
    }
}
