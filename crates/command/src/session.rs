//! Session commands and the replay-backed session reads.

use tracing::info;

use sigil_core::{AggregateId, CallerContext, DomainError, DomainResult, ObjectDetails};
use sigil_infra::{EventFilter, EventStore};
use sigil_session::{
    Metadata, SessionCheck, SessionToken, SessionWriteModel, UserDirectory, decide_create,
    decide_terminate, decide_update, ensure_mutable, resolve_checks,
};

use crate::{Commands, object_details};

/// Result of `create_session`. The token is returned exactly once.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub id: AggregateId,
    pub token: SessionToken,
    pub details: ObjectDetails,
}

/// Result of `update_session`.
#[derive(Debug, Clone)]
pub struct SessionChanged {
    pub details: ObjectDetails,
    /// Set only if the token was rotated; `update_session` never rotates, so
    /// callers keep presenting the token they have.
    pub new_token: Option<SessionToken>,
}

impl<S, D> Commands<S, D>
where
    S: EventStore,
    D: UserDirectory,
{
    /// Create a session, verifying `checks` on the way.
    ///
    /// Every satisfied check adds one factor event after `session.added`; the
    /// whole batch commits at once.
    ///
    /// The returned sequence is the stream head after that batch: 1 for a
    /// session created without checks, 3 with a user and a password check.
    /// It is not pinned to 1, since a later read of the same session must
    /// never report a lower sequence than creation did.
    pub fn create_session(
        &self,
        ctx: &CallerContext,
        checks: &[SessionCheck],
        metadata: Metadata,
        user_agent: Option<String>,
    ) -> DomainResult<CreatedSession> {
        let resolved = resolve_checks(&self.directory, ctx.tenant_id(), checks)?;
        let id = AggregateId::new();
        let token = SessionToken::mint();
        let token_hash = token.hash();

        let executed = self
            .engine
            .execute::<sigil_session::Session, _>(ctx, id, &self.sessions, |wm| {
                decide_create(
                    wm,
                    token_hash.clone(),
                    user_agent.clone(),
                    &resolved,
                    &metadata,
                )
            })
            .map_err(DomainError::from)?;

        info!(session_id = %id, sequence = executed.write_model.sequence(), "session created");
        Ok(CreatedSession {
            id,
            token,
            details: object_details(&executed.write_model)?,
        })
    }

    /// Add checks and metadata to an existing session.
    ///
    /// Checks that are already satisfied are verified again but add no event;
    /// if nothing changes the current details are returned without a push.
    pub fn update_session(
        &self,
        ctx: &CallerContext,
        id: AggregateId,
        token: &str,
        checks: &[SessionCheck],
        metadata: Metadata,
    ) -> DomainResult<SessionChanged> {
        let resolved = resolve_checks(&self.directory, ctx.tenant_id(), checks)?;

        let executed = self
            .engine
            .execute::<sigil_session::Session, _>(ctx, id, &self.sessions, |wm| {
                ensure_mutable(wm, token)?;
                // A password check alone is verified against the bound user.
                let bound_user = match (&resolved.user, &resolved.password, wm.state().user_id()) {
                    (None, Some(_), Some(user_id)) => {
                        Some(self.directory.find_user_by_id(ctx.tenant_id(), user_id)?)
                    }
                    _ => None,
                };
                decide_update(wm, token, &resolved, bound_user.as_ref(), &metadata)
            })
            .map_err(DomainError::from)?;

        Ok(SessionChanged {
            details: object_details(&executed.write_model)?,
            new_token: None,
        })
    }

    pub fn terminate_session(
        &self,
        ctx: &CallerContext,
        id: AggregateId,
        token: &str,
    ) -> DomainResult<ObjectDetails> {
        let executed = self
            .engine
            .execute::<sigil_session::Session, _>(ctx, id, &self.sessions, |wm| {
                decide_terminate(wm, token)
            })
            .map_err(DomainError::from)?;

        info!(session_id = %id, "session terminated");
        object_details(&executed.write_model)
    }

    /// Replay one session of the caller's tenant. Terminated sessions are
    /// returned as they are; filtering is up to the caller.
    pub fn session_by_id(&self, ctx: &CallerContext, id: AggregateId) -> DomainResult<SessionWriteModel> {
        if ctx.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let wm = self
            .engine
            .load::<sigil_session::Session>(ctx.tenant_id(), id, &self.sessions)
            .map_err(DomainError::from)?;
        if !wm.exists() {
            return Err(DomainError::not_found("session not found"));
        }
        Ok(wm)
    }

    /// Filtered replay of sessions of the caller's tenant.
    pub fn search_sessions(
        &self,
        ctx: &CallerContext,
        filter: &EventFilter,
    ) -> DomainResult<Vec<SessionWriteModel>> {
        if ctx.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        self.engine
            .search::<sigil_session::Session>(ctx.tenant_id(), filter, &self.sessions)
            .map_err(DomainError::from)
    }
}
