//! Per-aggregate write model reconstructed by replaying events.
//!
//! A write model is ephemeral: it is rebuilt from sequence 0 on every command
//! invocation and discarded afterwards. Reduction must be deterministic and
//! free of side effects, since it is purely a function of the event list.

use chrono::{DateTime, Utc};

use sigil_core::{AggregateId, Editor, ObjectDetails};

use crate::envelope::EventEnvelope;

/// Typed reduction of one aggregate type's events.
///
/// Implementations ignore event variants they have no use for; this is what
/// lets an older reducer replay a stream that already contains events it was
/// not written for.
pub trait Reducer: Default {
    type Event;

    /// Aggregate type this reducer folds (e.g. "session").
    const AGGREGATE_TYPE: &'static str;

    fn reduce(&mut self, event: &EventEnvelope<Self::Event>);

    /// Whether the aggregate reached its terminal removed/terminated state.
    fn is_removed(&self) -> bool {
        false
    }
}

/// Replayed state of one aggregate plus the stream bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteModel<R> {
    aggregate_id: AggregateId,
    aggregate_type: &'static str,
    sequence: u64,
    creation_date: Option<DateTime<Utc>>,
    change_date: Option<DateTime<Utc>>,
    creator: Option<Editor>,
    state: R,
}

impl<R: Reducer> WriteModel<R> {
    /// Empty write model at sequence 0.
    pub fn new(aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_id,
            aggregate_type: R::AGGREGATE_TYPE,
            sequence: 0,
            creation_date: None,
            change_date: None,
            creator: None,
            state: R::default(),
        }
    }

    /// Apply a single event.
    ///
    /// # Panics
    ///
    /// Panics if the event belongs to another aggregate or does not advance the
    /// sequence. The append engine guarantees ordered, contiguous delivery, so
    /// either case is a programming error.
    pub fn apply(&mut self, event: &EventEnvelope<R::Event>) {
        self.advance(event);
        self.state.reduce(event);
    }

    /// Account for an event this reducer has no decoder for.
    ///
    /// Sequence, dates and creator move forward; the state is untouched.
    /// Panics under the same conditions as [`WriteModel::apply`].
    pub fn skip<P>(&mut self, event: &EventEnvelope<P>) {
        self.advance(event);
    }

    fn advance<P>(&mut self, event: &EventEnvelope<P>) {
        assert_eq!(
            event.aggregate_id, self.aggregate_id,
            "event of aggregate {} applied to write model of {}",
            event.aggregate_id, self.aggregate_id
        );
        assert!(
            event.sequence > self.sequence,
            "event sequence {} applied to write model at sequence {}",
            event.sequence,
            self.sequence
        );

        if self.creation_date.is_none() {
            self.creation_date = Some(event.created_at);
            self.creator = Some(event.editor.clone());
        }
        self.change_date = Some(event.created_at);
        self.sequence = event.sequence;
    }

    /// Apply events in ascending sequence order.
    pub fn reduce<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a EventEnvelope<R::Event>>,
        R::Event: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// At least one event has been committed for this aggregate.
    pub fn exists(&self) -> bool {
        self.sequence > 0
    }

    pub fn is_removed(&self) -> bool {
        self.state.is_removed()
    }

    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.creation_date
    }

    pub fn change_date(&self) -> Option<DateTime<Utc>> {
        self.change_date
    }

    /// Editor of the first event.
    pub fn creator(&self) -> Option<&Editor> {
        self.creator.as_ref()
    }

    pub fn state(&self) -> &R {
        &self.state
    }

    /// Object details of the replayed aggregate; `None` if it does not exist.
    pub fn details(&self) -> Option<ObjectDetails> {
        match (self.creation_date, self.change_date) {
            (Some(creation_date), Some(change_date)) => Some(ObjectDetails {
                aggregate_id: self.aggregate_id,
                sequence: self.sequence,
                creation_date,
                change_date,
            }),
            _ => None,
        }
    }
}
