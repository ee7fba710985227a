//! Append engine: load → decide → push with optimistic concurrency.
//!
//! ```text
//! CallerContext + aggregate id
//!   ↓
//! 1. Load the stream (tenant-scoped) and validate it
//!   ↓
//! 2. Decode every event through the aggregate's registry and replay it;
//!    event types the registry has never heard of only advance the sequence
//!   ↓
//! 3. Decide new events against the write model (pure)
//!   ↓
//! 4. Push with `expected = write_model.sequence()` (compare-and-swap)
//!   ↓
//! 5. On a lost race: reload and decide again, up to `RetryPolicy::max_attempts`
//! ```
//!
//! Decoding, reduction and deciding are synchronous and pure; only the store
//! calls touch I/O.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use sigil_core::{AggregateId, CallerContext, DomainError, ExpectedSequence, TenantId};
use sigil_events::{Event, EventEnvelope, EventRegistry, Reducer, RegistryError, WriteModel};

use crate::event_store::{EventFilter, EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Failure of an engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Precondition / validation failure decided by the command, or cancellation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A stored event could not be decoded (deployment or data inconsistency).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The store failed or returned an inconsistent stream.
    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// The compare-and-swap on the stream head was lost.
    #[error("concurrent modification: {0}")]
    Concurrency(String),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Concurrency(_))
    }
}

impl From<EventStoreError> for EngineError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => EngineError::Concurrency(msg),
            other => EngineError::Store(other),
        }
    }
}

impl From<EngineError> for DomainError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Domain(err) => err,
            EngineError::Concurrency(_) => DomainError::conflict(
                "the aggregate was modified concurrently, retry the request",
            ),
            EngineError::Registry(err) => {
                error!(error = %err, "failed to decode stored event");
                DomainError::Internal
            }
            EngineError::Store(err) => {
                error!(error = %err, "event store failure");
                DomainError::Internal
            }
        }
    }
}

/// Bound and backoff of the optimistic retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of load → decide → push cycles, including the first.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before reloading.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// No retries: a lost race surfaces immediately.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10))
    }
}

/// Result of a successful [`Eventstore::execute`].
#[derive(Debug, Clone)]
pub struct Executed<R: Reducer> {
    /// Write model including the pushed events.
    pub write_model: WriteModel<R>,
    /// Events committed by this execution; empty if the decision was a no-op.
    pub pushed: Vec<EventEnvelope<R::Event>>,
}

/// Event-sourced aggregate engine over an [`EventStore`].
#[derive(Debug, Clone)]
pub struct Eventstore<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S> Eventstore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: EventStore> Eventstore<S> {
    /// Replay one aggregate into its write model.
    ///
    /// A never-written aggregate yields an empty model at sequence 0.
    pub fn load<R>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        registry: &EventRegistry<R::Event>,
    ) -> Result<WriteModel<R>, EngineError>
    where
        R: Reducer,
        R::Event: 'static,
    {
        let stream = self
            .store
            .load_stream(tenant_id, R::AGGREGATE_TYPE, aggregate_id)?;
        validate_loaded_stream(tenant_id, R::AGGREGATE_TYPE, aggregate_id, &stream)?;

        let mut write_model = WriteModel::<R>::new(aggregate_id);
        replay(&mut write_model, &stream, registry)?;
        debug!(
            aggregate_type = R::AGGREGATE_TYPE,
            aggregate_id = %aggregate_id,
            sequence = write_model.sequence(),
            "replayed write model"
        );
        Ok(write_model)
    }

    /// Append a batch expecting the stream head to be `expected`.
    ///
    /// Cancellation is honoured only before the store is called; an issued
    /// append runs to completion.
    pub fn push<E>(
        &self,
        ctx: &CallerContext,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        expected: u64,
        events: &[E],
    ) -> Result<Vec<StoredEvent>, EngineError>
    where
        E: Event + Serialize,
    {
        if events.is_empty() {
            return Err(EngineError::Store(EventStoreError::InvalidAppend(
                "empty push".to_string(),
            )));
        }
        if ctx.is_cancelled() {
            return Err(DomainError::Cancelled.into());
        }

        let uncommitted = events
            .iter()
            .map(|event| {
                UncommittedEvent::from_typed(
                    ctx.tenant_id(),
                    aggregate_id,
                    aggregate_type,
                    ctx.editor().clone(),
                    event,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self
            .store
            .append(uncommitted, ExpectedSequence::Exact(expected))?;

        if let Some(last) = committed.last() {
            info!(
                aggregate_type,
                aggregate_id = %aggregate_id,
                sequence = last.sequence,
                event_count = committed.len(),
                "pushed events"
            );
        }
        Ok(committed)
    }

    /// Run the bounded load → decide → push loop for one aggregate.
    ///
    /// `decide` sees a freshly replayed write model on every attempt and must
    /// be free of side effects. Domain errors it returns are surfaced as they
    /// are, without retrying; only a lost compare-and-swap is retried.
    pub fn execute<R, F>(
        &self,
        ctx: &CallerContext,
        aggregate_id: AggregateId,
        registry: &EventRegistry<R::Event>,
        mut decide: F,
    ) -> Result<Executed<R>, EngineError>
    where
        R: Reducer,
        R::Event: Event + Serialize,
        F: FnMut(&WriteModel<R>) -> Result<Vec<R::Event>, DomainError>,
    {
        let mut attempt = 1;
        loop {
            if ctx.is_cancelled() {
                return Err(DomainError::Cancelled.into());
            }

            let mut write_model = self.load::<R>(ctx.tenant_id(), aggregate_id, registry)?;
            let decided = decide(&write_model)?;
            if decided.is_empty() {
                return Ok(Executed {
                    write_model,
                    pushed: vec![],
                });
            }

            match self.push(
                ctx,
                R::AGGREGATE_TYPE,
                aggregate_id,
                write_model.sequence(),
                &decided,
            ) {
                Ok(committed) => {
                    let pushed: Vec<_> = committed
                        .iter()
                        .zip(decided)
                        .map(|(stored, event)| stored.with_payload(event))
                        .collect();
                    write_model.reduce(&pushed);
                    return Ok(Executed {
                        write_model,
                        pushed,
                    });
                }
                Err(EngineError::Concurrency(reason)) if attempt < self.policy.max_attempts => {
                    warn!(
                        aggregate_type = R::AGGREGATE_TYPE,
                        aggregate_id = %aggregate_id,
                        attempt,
                        %reason,
                        "concurrent modification, reloading"
                    );
                    std::thread::sleep(self.policy.delay(attempt));
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_conflict() {
                        warn!(
                            aggregate_type = R::AGGREGATE_TYPE,
                            aggregate_id = %aggregate_id,
                            attempts = attempt,
                            "giving up after repeated concurrent modifications"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Filtered replay: one write model per matching aggregate, ordered by id.
    pub fn search<R>(
        &self,
        tenant_id: TenantId,
        filter: &EventFilter,
        registry: &EventRegistry<R::Event>,
    ) -> Result<Vec<WriteModel<R>>, EngineError>
    where
        R: Reducer,
        R::Event: 'static,
    {
        if filter.aggregate_type != R::AGGREGATE_TYPE {
            return Err(EngineError::Store(EventStoreError::AggregateTypeMismatch(
                format!(
                    "filter for {} used to replay {}",
                    filter.aggregate_type,
                    R::AGGREGATE_TYPE
                ),
            )));
        }

        let mut streams: BTreeMap<AggregateId, Vec<StoredEvent>> = BTreeMap::new();
        for event in self.store.search(tenant_id, filter)? {
            streams.entry(event.aggregate_id).or_default().push(event);
        }

        let mut models = Vec::with_capacity(streams.len());
        for (aggregate_id, stream) in streams {
            validate_loaded_stream(tenant_id, R::AGGREGATE_TYPE, aggregate_id, &stream)?;
            let mut write_model = WriteModel::<R>::new(aggregate_id);
            replay(&mut write_model, &stream, registry)?;
            models.push(write_model);
        }
        Ok(models)
    }
}

/// Fold a validated stream into `write_model`.
///
/// Event types without any registered decoder are skipped. A known type with
/// an unknown schema version, or a payload that does not decode, is fatal.
fn replay<R>(
    write_model: &mut WriteModel<R>,
    stream: &[StoredEvent],
    registry: &EventRegistry<R::Event>,
) -> Result<(), EngineError>
where
    R: Reducer,
    R::Event: 'static,
{
    for raw in stream {
        if !registry.knows_event_type(R::AGGREGATE_TYPE, &raw.event_type) {
            debug!(
                aggregate_type = R::AGGREGATE_TYPE,
                aggregate_id = %raw.aggregate_id,
                event_type = %raw.event_type,
                sequence = raw.sequence,
                "skipping unregistered event type"
            );
            write_model.skip(raw);
            continue;
        }
        write_model.apply(&registry.decode(raw)?);
    }
    Ok(())
}

/// Reject streams a correct backend can never return.
///
/// `WriteModel::apply` panics on out-of-order events, so this is checked
/// before anything is replayed.
fn validate_loaded_stream(
    tenant_id: TenantId,
    aggregate_type: &str,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), EngineError> {
    for (idx, e) in stream.iter().enumerate() {
        if e.tenant_id != tenant_id {
            return Err(EngineError::Store(EventStoreError::TenantIsolation(format!(
                "loaded stream contains wrong tenant_id at index {idx}"
            ))));
        }
        if e.aggregate_id != aggregate_id || e.aggregate_type != aggregate_type {
            return Err(EngineError::Store(EventStoreError::AggregateTypeMismatch(
                format!("loaded stream contains a foreign event at index {idx}"),
            )));
        }
        let expected = idx as u64 + 1;
        if e.sequence != expected {
            return Err(EngineError::Store(EventStoreError::CorruptStream(format!(
                "expected sequence {expected}, found {}",
                e.sequence
            ))));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use sigil_core::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::event_store::InMemoryEventStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Added {
        n: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    #[serde(untagged)]
    enum TallyEvent {
        Added(Added),
    }

    impl Event for TallyEvent {
        fn event_type(&self) -> &'static str {
            "tally.added"
        }

        fn schema_version(&self) -> u32 {
            1
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Tally {
        total: i64,
    }

    impl Reducer for Tally {
        type Event = TallyEvent;
        const AGGREGATE_TYPE: &'static str = "tally";

        fn reduce(&mut self, event: &EventEnvelope<TallyEvent>) {
            let TallyEvent::Added(added) = &event.payload;
            self.total += added.n;
        }
    }

    fn registry() -> EventRegistry<TallyEvent> {
        let mut r = EventRegistry::new();
        r.register_payload("tally", "tally.added", 1, TallyEvent::Added)
            .unwrap();
        r
    }

    fn ctx() -> CallerContext {
        CallerContext::new(TenantId::new(), UserId::new(), "test")
    }

    fn add(n: i64) -> TallyEvent {
        TallyEvent::Added(Added { n })
    }

    /// Store that lets another writer sneak in before the first `n` appends.
    struct RacingStore {
        inner: InMemoryEventStore,
        races_left: AtomicUsize,
    }

    impl EventStore for RacingStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected: ExpectedSequence,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if self
                .races_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                let mut rival = events[..1].to_vec();
                rival[0].event_id = uuid::Uuid::now_v7();
                self.inner.append(rival, ExpectedSequence::Any)?;
            }
            self.inner.append(events, expected)
        }

        fn load_stream(
            &self,
            tenant_id: TenantId,
            aggregate_type: &str,
            aggregate_id: AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(tenant_id, aggregate_type, aggregate_id)
        }

        fn search(
            &self,
            tenant_id: TenantId,
            filter: &EventFilter,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.search(tenant_id, filter)
        }
    }

    fn racing(races: usize) -> Eventstore<RacingStore> {
        Eventstore::new(RacingStore {
            inner: InMemoryEventStore::new(),
            races_left: AtomicUsize::new(races),
        })
        .with_retry_policy(RetryPolicy::new(3, Duration::ZERO))
    }

    #[test]
    fn execute_pushes_and_returns_updated_model() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let ctx = ctx();
        let id = AggregateId::new();
        let registry = registry();

        let first = engine
            .execute::<Tally, _>(&ctx, id, &registry, |_| Ok(vec![add(2), add(3)]))
            .unwrap();
        assert_eq!(first.write_model.sequence(), 2);
        assert_eq!(first.write_model.state().total, 5);
        assert_eq!(first.pushed.len(), 2);

        let loaded: WriteModel<Tally> = engine.load(ctx.tenant_id(), id, &registry).unwrap();
        assert_eq!(loaded.sequence(), 2);
        assert_eq!(loaded.state(), first.write_model.state());
        assert_eq!(loaded.creator(), Some(ctx.editor()));
    }

    #[test]
    fn empty_decision_does_not_touch_the_store() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let ctx = ctx();
        let executed = engine
            .execute::<Tally, _>(&ctx, AggregateId::new(), &registry(), |_| Ok(vec![]))
            .unwrap();
        assert!(executed.pushed.is_empty());
        assert_eq!(engine.store().event_count(), 0);
    }

    #[test]
    fn empty_push_is_rejected() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let err = engine
            .push::<TallyEvent>(&ctx(), "tally", AggregateId::new(), 0, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Store(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn domain_errors_are_not_retried() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let mut calls = 0;
        let err = engine
            .execute::<Tally, _>(&ctx(), AggregateId::new(), &registry(), |_| {
                calls += 1;
                Err(DomainError::invalid_argument("nope"))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        match DomainError::from(err) {
            DomainError::InvalidArgument(_) => {}
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
    }

    #[test]
    fn lost_race_is_retried_against_the_new_head() {
        let engine = racing(1);
        let ctx = ctx();
        let id = AggregateId::new();
        let mut seen = Vec::new();

        let executed = engine
            .execute::<Tally, _>(&ctx, id, &registry(), |wm| {
                seen.push(wm.sequence());
                Ok(vec![add(10)])
            })
            .unwrap();

        assert_eq!(seen, vec![0, 1]);
        assert_eq!(executed.write_model.sequence(), 2);
        assert_eq!(executed.pushed[0].sequence, 2);
        assert_eq!(executed.write_model.state().total, 20);
    }

    #[test]
    fn conflict_surfaces_after_max_attempts() {
        let engine = racing(10);
        let mut calls = 0;
        let err = engine
            .execute::<Tally, _>(&ctx(), AggregateId::new(), &registry(), |_| {
                calls += 1;
                Ok(vec![add(1)])
            })
            .unwrap_err();
        assert_eq!(calls, 3);
        assert!(err.is_conflict());
        match DomainError::from(err) {
            DomainError::ConcurrentModification(msg) => assert!(!msg.contains("sequence")),
            other => panic!("expected ConcurrentModification, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_context_never_reaches_the_store() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let token = sigil_core::CancellationToken::new();
        let ctx = ctx().with_cancellation(token.clone());
        token.cancel();

        let err = engine
            .execute::<Tally, _>(&ctx, AggregateId::new(), &registry(), |_| Ok(vec![add(1)]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::Cancelled)));
        assert_eq!(engine.store().event_count(), 0);
    }

    #[test]
    fn cancellation_during_decide_stops_before_push() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let token = sigil_core::CancellationToken::new();
        let ctx = ctx().with_cancellation(token.clone());

        let err = engine
            .execute::<Tally, _>(&ctx, AggregateId::new(), &registry(), |_| {
                token.cancel();
                Ok(vec![add(1)])
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::Cancelled)));
        assert_eq!(engine.store().event_count(), 0);
    }

    fn raw_tally(
        ctx: &CallerContext,
        id: AggregateId,
        event_type: &str,
        schema_version: u32,
        payload: serde_json::Value,
    ) -> UncommittedEvent {
        UncommittedEvent {
            event_id: uuid::Uuid::now_v7(),
            tenant_id: ctx.tenant_id(),
            aggregate_id: id,
            aggregate_type: "tally".to_string(),
            event_type: event_type.to_string(),
            schema_version,
            editor: ctx.editor().clone(),
            payload,
        }
    }

    #[test]
    fn unknown_schema_version_is_an_internal_error() {
        let store = InMemoryEventStore::new();
        let ctx = ctx();
        let id = AggregateId::new();
        store
            .append(
                vec![raw_tally(&ctx, id, "tally.added", 2, serde_json::json!({ "n": 1 }))],
                ExpectedSequence::Exact(0),
            )
            .unwrap();
        let engine = Eventstore::new(store);

        let err = engine
            .load::<Tally>(ctx.tenant_id(), id, &registry())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Registry(RegistryError::UnknownEventType { .. })
        ));
        assert_eq!(DomainError::from(err), DomainError::Internal);
    }

    #[test]
    fn malformed_payload_is_an_internal_error() {
        let store = InMemoryEventStore::new();
        let ctx = ctx();
        let id = AggregateId::new();
        store
            .append(
                vec![raw_tally(&ctx, id, "tally.added", 1, serde_json::json!({ "n": "one" }))],
                ExpectedSequence::Exact(0),
            )
            .unwrap();
        let engine = Eventstore::new(store);

        let err = engine
            .load::<Tally>(ctx.tenant_id(), id, &registry())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Registry(RegistryError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn unregistered_event_types_are_skipped_on_replay() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let ctx = ctx();
        let id = AggregateId::new();
        let registry = registry();

        engine
            .execute::<Tally, _>(&ctx, id, &registry, |_| Ok(vec![add(2)]))
            .unwrap();
        engine
            .store()
            .append(
                vec![raw_tally(&ctx, id, "tally.reset", 1, serde_json::json!({}))],
                ExpectedSequence::Exact(1),
            )
            .unwrap();

        let loaded: WriteModel<Tally> = engine.load(ctx.tenant_id(), id, &registry).unwrap();
        assert_eq!(loaded.sequence(), 2);
        assert_eq!(loaded.state().total, 2);

        // The next decision is pushed on top of the skipped event.
        let executed = engine
            .execute::<Tally, _>(&ctx, id, &registry, |wm| {
                assert_eq!(wm.sequence(), 2);
                Ok(vec![add(3)])
            })
            .unwrap();
        assert_eq!(executed.pushed[0].sequence, 3);
        assert_eq!(executed.write_model.state().total, 5);

        let found: Vec<WriteModel<Tally>> = engine
            .search(ctx.tenant_id(), &EventFilter::aggregate_type("tally"), &registry)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].sequence(), 3);
    }

    #[test]
    fn search_replays_each_matching_aggregate() {
        let engine = Eventstore::new(InMemoryEventStore::new());
        let ctx = ctx();
        let other = CallerContext::new(ctx.tenant_id(), UserId::new(), "test");
        let registry = registry();

        let mine = AggregateId::new();
        let theirs = AggregateId::new();
        engine
            .execute::<Tally, _>(&ctx, mine, &registry, |_| Ok(vec![add(1)]))
            .unwrap();
        engine
            .execute::<Tally, _>(&other, theirs, &registry, |_| Ok(vec![add(2)]))
            .unwrap();

        let all: Vec<WriteModel<Tally>> = engine
            .search(ctx.tenant_id(), &EventFilter::aggregate_type("tally"), &registry)
            .unwrap();
        assert_eq!(all.len(), 2);

        let by_creator: Vec<WriteModel<Tally>> = engine
            .search(
                ctx.tenant_id(),
                &EventFilter::aggregate_type("tally").with_creator(ctx.user_id()),
                &registry,
            )
            .unwrap();
        assert_eq!(by_creator.len(), 1);
        assert_eq!(by_creator[0].aggregate_id(), mine);
    }

    #[test]
    fn retry_policy_backoff_is_linear() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(20));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }
}
