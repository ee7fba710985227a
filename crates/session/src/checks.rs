//! Session checks and the decisions built on them.
//!
//! Everything here validates against a replayed [`SessionWriteModel`] and
//! returns the events to push. Nothing touches the store; precondition
//! failures are reported before any event is built.

use sigil_core::{DomainError, DomainResult, TenantId, UserId};

use crate::directory::{User, UserDirectory};
use crate::events::{
    Metadata, MetadataSet, PasswordChecked, SessionAdded, SessionEvent, SessionTerminated,
    UserChecked,
};
use crate::session::SessionWriteModel;

/// How a user check finds its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSearch {
    ById(UserId),
    ByLoginName(String),
}

/// A verification fact requested by the caller.
#[derive(Clone, PartialEq, Eq)]
pub enum SessionCheck {
    User(UserSearch),
    Password(String),
}

impl core::fmt::Debug for SessionCheck {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionCheck::User(search) => f.debug_tuple("User").field(search).finish(),
            SessionCheck::Password(_) => f.write_str("Password(..)"),
        }
    }
}

/// Checks of one request with their user lookup already done.
#[derive(Debug, Clone, Default)]
pub struct ResolvedChecks {
    pub user: Option<User>,
    pub password: Option<String>,
}

impl ResolvedChecks {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.password.is_none()
    }
}

/// Run the user lookups of `checks` against the directory.
///
/// At most one check of each kind is accepted per request.
pub fn resolve_checks<D>(
    directory: &D,
    tenant_id: TenantId,
    checks: &[SessionCheck],
) -> DomainResult<ResolvedChecks>
where
    D: UserDirectory + ?Sized,
{
    let mut resolved = ResolvedChecks::default();
    for check in checks {
        match check {
            SessionCheck::User(search) => {
                if resolved.user.is_some() {
                    return Err(DomainError::invalid_argument("more than one user check"));
                }
                let user = match search {
                    UserSearch::ById(id) => directory.find_user_by_id(tenant_id, *id)?,
                    UserSearch::ByLoginName(login_name) => {
                        if login_name.trim().is_empty() {
                            return Err(DomainError::invalid_argument("login name is empty"));
                        }
                        directory.find_user_by_login_name(tenant_id, login_name)?
                    }
                };
                resolved.user = Some(user);
            }
            SessionCheck::Password(password) => {
                if resolved.password.is_some() {
                    return Err(DomainError::invalid_argument("more than one password check"));
                }
                if password.is_empty() {
                    return Err(DomainError::invalid_argument("password is empty"));
                }
                resolved.password = Some(password.clone());
            }
        }
    }
    Ok(resolved)
}

/// Events for a new session.
///
/// `bound_user` is not needed here: a new session has no user yet, so a
/// password check must come with a user check.
pub fn decide_create(
    session: &SessionWriteModel,
    token_hash: String,
    user_agent: Option<String>,
    checks: &ResolvedChecks,
    metadata: &Metadata,
) -> DomainResult<Vec<SessionEvent>> {
    if session.exists() {
        return Err(DomainError::invalid_argument("session already exists"));
    }
    let mut events = vec![SessionEvent::Added(SessionAdded {
        token_hash,
        user_agent,
    })];
    events.extend(decide_checks(session, checks, None)?);
    if !metadata.is_empty() {
        events.push(SessionEvent::MetadataSet(MetadataSet {
            metadata: metadata.clone(),
        }));
    }
    Ok(events)
}

/// Events for additional checks and metadata on an existing session.
///
/// `bound_user` is the directory record of the user the session is already
/// bound to; it is only consulted for a password check without a user check in
/// the same request.
pub fn decide_update(
    session: &SessionWriteModel,
    token: &str,
    checks: &ResolvedChecks,
    bound_user: Option<&User>,
    metadata: &Metadata,
) -> DomainResult<Vec<SessionEvent>> {
    ensure_mutable(session, token)?;
    let mut events = decide_checks(session, checks, bound_user)?;
    if !metadata.is_empty() {
        events.push(SessionEvent::MetadataSet(MetadataSet {
            metadata: metadata.clone(),
        }));
    }
    Ok(events)
}

pub fn decide_terminate(session: &SessionWriteModel, token: &str) -> DomainResult<Vec<SessionEvent>> {
    ensure_mutable(session, token)?;
    Ok(vec![SessionEvent::Terminated(SessionTerminated {})])
}

/// Missing → `NotFound`, wrong token → `Unauthenticated`, terminated →
/// `AggregateRemoved`, in that order.
pub fn ensure_mutable(session: &SessionWriteModel, token: &str) -> DomainResult<()> {
    let state = session.state();
    if !session.exists() || !state.exists() {
        return Err(DomainError::not_found("session not found"));
    }
    if !state.verify_token(token) {
        return Err(DomainError::unauthenticated("session token is invalid"));
    }
    if session.is_removed() {
        return Err(DomainError::removed("session is terminated"));
    }
    Ok(())
}

/// Factor events for the checks not yet satisfied by the session.
///
/// A satisfied factor is still verified again (a wrong password fails even if
/// the password factor is already set) but produces no event.
fn decide_checks(
    session: &SessionWriteModel,
    checks: &ResolvedChecks,
    bound_user: Option<&User>,
) -> DomainResult<Vec<SessionEvent>> {
    let state = session.state();
    let mut events = Vec::new();

    if let Some(user) = &checks.user {
        match state.user_id() {
            Some(current) if current != user.id => {
                return Err(DomainError::invalid_argument(
                    "session is already bound to another user",
                ));
            }
            Some(_) => {}
            None => events.push(SessionEvent::UserChecked(UserChecked { user_id: user.id })),
        }
    }

    if let Some(password) = &checks.password {
        let user = checks
            .user
            .as_ref()
            .or(bound_user.filter(|u| Some(u.id) == state.user_id()))
            .ok_or_else(|| DomainError::invalid_argument("password check requires a user"))?;
        user.verify_password(password)?;
        if state.password_factor().is_none() {
            events.push(SessionEvent::PasswordChecked(PasswordChecked {}));
        }
    }

    Ok(events)
}
