//! Session API service.
//!
//! Maps request DTOs onto the command layer and renders replayed sessions.
//! Reads are served by filtered replay of the session streams.

use chrono::Utc;
use tracing::debug;

use sigil_command::Commands;
use sigil_core::{CallerContext, DomainError};
use sigil_infra::EventStore;
use sigil_session::{SessionCheck, SessionWriteModel, UserDirectory, UserSearch};

use crate::dto::{
    ChecksRequest, CreateSessionRequest, CreateSessionResponse, DeleteSessionRequest,
    DeleteSessionResponse, Details, FactorsView, GetSessionRequest, GetSessionResponse,
    ListDetails, ListSessionsRequest, ListSessionsResponse, PasswordFactorView, SessionView,
    SetSessionRequest, SetSessionResponse, UserFactorView, UserSearchRequest,
};
use crate::error::ApiError;
use crate::search::SessionSearch;

pub type ApiResult<T> = Result<T, ApiError>;

pub struct SessionService<S, D> {
    commands: Commands<S, D>,
}

impl<S, D> SessionService<S, D>
where
    S: EventStore,
    D: UserDirectory,
{
    pub fn new(commands: Commands<S, D>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &Commands<S, D> {
        &self.commands
    }

    /// Read one session.
    ///
    /// With a token the token must match; without one only the creator may
    /// read it. Terminated sessions are not found.
    pub fn get_session(&self, ctx: &CallerContext, req: GetSessionRequest) -> ApiResult<GetSessionResponse> {
        let wm = self.commands.session_by_id(ctx, req.session_id)?;
        if wm.is_removed() {
            return Err(DomainError::not_found("session not found").into());
        }
        match req.session_token.as_deref() {
            Some(token) if !wm.state().verify_token(token) => {
                return Err(DomainError::unauthenticated("session token is invalid").into());
            }
            Some(_) => {}
            None if wm.creator().map(|e| e.user_id) != Some(ctx.user_id()) => {
                return Err(DomainError::not_found("session not found").into());
            }
            None => {}
        }
        Ok(GetSessionResponse {
            session: self.render(ctx, &wm),
        })
    }

    pub fn list_sessions(&self, ctx: &CallerContext, req: ListSessionsRequest) -> ApiResult<ListSessionsResponse> {
        let search = SessionSearch::from_request(ctx, &req)?;
        let filter = search.to_filter();
        debug!(?filter, "listing sessions");

        let live: Vec<_> = self
            .commands
            .search_sessions(ctx, &filter)?
            .into_iter()
            .filter(|wm| wm.exists() && !wm.is_removed())
            .collect();
        let total_result = live.len() as u64;

        Ok(ListSessionsResponse {
            details: ListDetails {
                total_result,
                timestamp: Utc::now(),
            },
            sessions: search
                .page(live)
                .iter()
                .map(|wm| self.render(ctx, wm))
                .collect(),
        })
    }

    pub fn create_session(&self, ctx: &CallerContext, req: CreateSessionRequest) -> ApiResult<CreateSessionResponse> {
        let checks = checks_to_command(req.checks)?;
        let created = self
            .commands
            .create_session(ctx, &checks, req.metadata, req.user_agent)?;
        Ok(CreateSessionResponse {
            details: Details::new(&created.details, ctx.tenant_id()),
            session_id: created.id,
            session_token: created.token.into_string(),
        })
    }

    /// Add checks and metadata. The token is never rotated here, so the
    /// response echoes the presented one.
    pub fn set_session(&self, ctx: &CallerContext, req: SetSessionRequest) -> ApiResult<SetSessionResponse> {
        let checks = checks_to_command(req.checks)?;
        let changed = self.commands.update_session(
            ctx,
            req.session_id,
            &req.session_token,
            &checks,
            req.metadata,
        )?;
        let session_token = match changed.new_token {
            Some(token) => token.into_string(),
            None => req.session_token,
        };
        Ok(SetSessionResponse {
            details: Details::new(&changed.details, ctx.tenant_id()),
            session_token,
        })
    }

    pub fn delete_session(&self, ctx: &CallerContext, req: DeleteSessionRequest) -> ApiResult<DeleteSessionResponse> {
        let details = self
            .commands
            .terminate_session(ctx, req.session_id, &req.session_token)?;
        Ok(DeleteSessionResponse {
            details: Details::new(&details, ctx.tenant_id()),
        })
    }

    fn render(&self, ctx: &CallerContext, wm: &SessionWriteModel) -> SessionView {
        let session = wm.state();
        let user = session.user_factor().map(|factor| {
            // A user removed from the directory still shows up by id.
            let found = self
                .commands
                .directory()
                .find_user_by_id(ctx.tenant_id(), factor.user_id)
                .ok();
            UserFactorView {
                id: factor.user_id,
                verified_at: factor.checked_at,
                login_name: found.as_ref().map(|u| u.login_name.clone()),
                display_name: found.map(|u| u.display_name),
            }
        });
        let password = session.password_factor().map(|factor| PasswordFactorView {
            verified_at: factor.checked_at,
        });
        let factors = (user.is_some() || password.is_some()).then_some(FactorsView { user, password });

        SessionView {
            id: wm.aggregate_id(),
            creation_date: wm.creation_date().unwrap_or_default(),
            change_date: wm.change_date().unwrap_or_default(),
            sequence: wm.sequence(),
            factors,
            metadata: session.metadata().clone(),
            user_agent: session.user_agent().map(str::to_string),
        }
    }
}

/// Translate request checks into command checks.
///
/// Unknown user searches are `Unimplemented`.
pub fn checks_to_command(checks: Option<ChecksRequest>) -> ApiResult<Vec<SessionCheck>> {
    let Some(checks) = checks else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(2);
    if let Some(user) = checks.user {
        let search = match user {
            UserSearchRequest::UserId { user_id } => UserSearch::ById(user_id),
            UserSearchRequest::LoginName { login_name } => UserSearch::ByLoginName(login_name),
            UserSearchRequest::Unspecified => {
                return Err(ApiError::unimplemented("user search not implemented"));
            }
        };
        out.push(SessionCheck::User(search));
    }
    if let Some(password) = checks.password {
        out.push(SessionCheck::Password(password.password));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::PasswordCheckRequest;
    use sigil_core::UserId;

    #[test]
    fn no_checks_is_empty() {
        assert!(checks_to_command(None).unwrap().is_empty());
        assert!(checks_to_command(Some(ChecksRequest::default())).unwrap().is_empty());
    }

    #[test]
    fn user_check_comes_before_password() {
        let user_id = UserId::new();
        let checks = checks_to_command(Some(ChecksRequest {
            user: Some(UserSearchRequest::UserId { user_id }),
            password: Some(PasswordCheckRequest {
                password: "pw".to_string(),
            }),
        }))
        .unwrap();
        assert_eq!(
            checks,
            vec![
                SessionCheck::User(UserSearch::ById(user_id)),
                SessionCheck::Password("pw".to_string()),
            ]
        );
    }

    #[test]
    fn unspecified_user_search_is_unimplemented() {
        let err = checks_to_command(Some(ChecksRequest {
            user: Some(UserSearchRequest::Unspecified),
            password: None,
        }))
        .unwrap_err();
        assert_eq!(err.code, "unimplemented");
        assert_eq!(err.status, 501);
    }
}
