//! Filters for the store's filtered replay.

use sigil_core::{AggregateId, UserId};

/// Filter criteria for [`EventStore::search`](super::EventStore::search).
///
/// Filters select whole streams: a stream matches if its aggregate type
/// matches and every optional criterion set here holds for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub aggregate_type: String,
    /// Restrict to these aggregates.
    pub aggregate_ids: Option<Vec<AggregateId>>,
    /// Restrict to aggregates whose first event was written by this user.
    pub creator: Option<UserId>,
}

impl EventFilter {
    pub fn aggregate_type(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_ids: None,
            creator: None,
        }
    }

    pub fn with_ids(mut self, ids: impl IntoIterator<Item = AggregateId>) -> Self {
        self.aggregate_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn with_creator(mut self, creator: UserId) -> Self {
        self.creator = Some(creator);
        self
    }

    pub(crate) fn matches_id(&self, id: &AggregateId) -> bool {
        self.aggregate_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(id))
    }

    pub(crate) fn matches_creator(&self, creator: &UserId) -> bool {
        self.creator.is_none_or(|c| c == *creator)
    }
}
