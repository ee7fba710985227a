//! Aggregate bookkeeping shared by the store, the engine and the command layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::AggregateId;

/// Optimistic concurrency expectation for an aggregate stream.
///
/// A stream's sequence is the sequence of its last committed event, `0` for a
/// stream that has never been written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedSequence {
    /// Skip the check (migrations, tooling).
    Any,
    /// Require the stream head to be exactly this sequence.
    Exact(u64),
}

impl ExpectedSequence {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedSequence::Any => true,
            ExpectedSequence::Exact(s) => s == actual,
        }
    }
}

/// Details of an aggregate after a command, handed back to the API layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDetails {
    pub aggregate_id: AggregateId,
    /// Sequence of the last event of the aggregate.
    pub sequence: u64,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_the_same_sequence() {
        assert!(ExpectedSequence::Exact(3).matches(3));
        assert!(!ExpectedSequence::Exact(3).matches(4));
        assert!(ExpectedSequence::Any.matches(42));
    }
}
