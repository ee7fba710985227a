//! Session list queries.
//!
//! Listing is always scoped to sessions the caller created: the creator query
//! is appended after whatever the caller asked for and cannot be removed.

use std::collections::BTreeSet;

use sigil_core::{AggregateId, CallerContext, UserId};
use sigil_infra::EventFilter;

use crate::dto::{ListSessionsRequest, SearchQueryRequest};
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionQuery {
    Ids(Vec<AggregateId>),
    Creator(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSearch {
    queries: Vec<SessionQuery>,
    offset: u64,
    limit: Option<u64>,
}

impl SessionSearch {
    /// Translate the request queries and append the caller's creator scope.
    pub fn from_request(ctx: &CallerContext, req: &ListSessionsRequest) -> Result<Self, ApiError> {
        let mut queries = req
            .queries
            .iter()
            .map(|q| match q {
                SearchQueryRequest::Ids { ids } => Ok(SessionQuery::Ids(ids.clone())),
                SearchQueryRequest::Unspecified => {
                    Err(ApiError::invalid_argument("unsupported session query"))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        queries.push(SessionQuery::Creator(ctx.user_id()));

        Ok(Self {
            queries,
            offset: req.offset,
            limit: req.limit.filter(|l| *l > 0),
        })
    }

    pub fn queries(&self) -> &[SessionQuery] {
        &self.queries
    }

    /// Store filter equivalent to the conjunction of all queries.
    ///
    /// Several id queries intersect; the last creator query wins.
    pub fn to_filter(&self) -> EventFilter {
        let mut filter = EventFilter::aggregate_type(sigil_session::events::AGGREGATE_TYPE);
        let mut ids: Option<BTreeSet<AggregateId>> = None;
        for query in &self.queries {
            match query {
                SessionQuery::Ids(requested) => {
                    let requested: BTreeSet<_> = requested.iter().copied().collect();
                    ids = Some(match ids {
                        Some(current) => current.intersection(&requested).copied().collect(),
                        None => requested,
                    });
                }
                SessionQuery::Creator(user_id) => filter = filter.with_creator(*user_id),
            }
        }
        if let Some(ids) = ids {
            filter = filter.with_ids(ids);
        }
        filter
    }

    /// Apply offset and limit to the matching items.
    pub fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let iter = items.into_iter().skip(offset);
        match self.limit.and_then(|l| usize::try_from(l).ok()) {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}
