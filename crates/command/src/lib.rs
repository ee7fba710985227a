//! `sigil-command`: command layer.
//!
//! Every command follows the same shape: resolve external lookups, then let
//! the engine load the aggregate, decide new events against the replayed
//! write model and push them with optimistic concurrency. Only a lost race is
//! retried; every other failure is returned as a categorised [`DomainError`].
//!
//! [`DomainError`]: sigil_core::DomainError

use std::sync::Arc;

use sigil_core::{DomainError, DomainResult, ObjectDetails};
use sigil_events::{EventRegistry, Reducer, RegistryError, WriteModel};
use sigil_infra::Eventstore;
use sigil_org::{OrgDomainEvent, OrgDomainPolicy, org_registry};
use sigil_session::{SessionEvent, session_registry};

pub mod org;
pub mod session;

pub use session::{CreatedSession, SessionChanged};

/// Command entry points for sessions and org domains.
///
/// - `S`: event store backing the engine
/// - `D`: user directory used by session user checks
#[derive(Debug)]
pub struct Commands<S, D> {
    engine: Eventstore<S>,
    directory: D,
    sessions: Arc<EventRegistry<SessionEvent>>,
    orgs: Arc<EventRegistry<OrgDomainEvent>>,
    domain_policy: OrgDomainPolicy,
}

impl<S, D> Commands<S, D> {
    /// Build the registries and wire the collaborators.
    ///
    /// Fails only if a registry has a duplicate key, which is a deployment bug.
    pub fn new(engine: Eventstore<S>, directory: D) -> Result<Self, RegistryError> {
        Ok(Self {
            engine,
            directory,
            sessions: Arc::new(session_registry()?),
            orgs: Arc::new(org_registry()?),
            domain_policy: OrgDomainPolicy::default(),
        })
    }

    pub fn with_domain_policy(mut self, policy: OrgDomainPolicy) -> Self {
        self.domain_policy = policy;
        self
    }

    pub fn engine(&self) -> &Eventstore<S> {
        &self.engine
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }
}

/// Details of an aggregate that must exist after the command ran.
fn object_details<R: Reducer>(write_model: &WriteModel<R>) -> DomainResult<ObjectDetails> {
    write_model
        .details()
        .ok_or_else(|| DomainError::not_found(format!("{} not found", R::AGGREGATE_TYPE)))
}
