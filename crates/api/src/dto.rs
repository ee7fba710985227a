use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sigil_core::{AggregateId, ObjectDetails, TenantId, UserId};

// -------------------------
// Request DTOs
// -------------------------

/// How a user check names its user. Unknown variants deserialize to
/// `Unspecified` and are rejected by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "search", rename_all = "snake_case")]
pub enum UserSearchRequest {
    UserId { user_id: UserId },
    LoginName { login_name: String },
    #[serde(other)]
    Unspecified,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordCheckRequest {
    pub password: String,
}

impl std::fmt::Debug for PasswordCheckRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCheckRequest")
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksRequest {
    #[serde(default)]
    pub user: Option<UserSearchRequest>,
    #[serde(default)]
    pub password: Option<PasswordCheckRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub checks: Option<ChecksRequest>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetSessionRequest {
    pub session_id: AggregateId,
    pub session_token: String,
    #[serde(default)]
    pub checks: Option<ChecksRequest>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteSessionRequest {
    pub session_id: AggregateId,
    pub session_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetSessionRequest {
    pub session_id: AggregateId,
    #[serde(default)]
    pub session_token: Option<String>,
}

/// One user-supplied list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum SearchQueryRequest {
    Ids { ids: Vec<AggregateId> },
    #[serde(other)]
    Unspecified,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListSessionsRequest {
    #[serde(default)]
    pub queries: Vec<SearchQueryRequest>,
    #[serde(default)]
    pub offset: u64,
    /// `None` or `0` returns everything after `offset`.
    #[serde(default)]
    pub limit: Option<u64>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Details {
    pub sequence: u64,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
    pub resource_owner: TenantId,
}

impl Details {
    pub fn new(details: &ObjectDetails, resource_owner: TenantId) -> Self {
        Self {
            sequence: details.sequence,
            creation_date: details.creation_date,
            change_date: details.change_date,
            resource_owner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListDetails {
    pub total_result: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFactorView {
    pub id: UserId,
    pub verified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordFactorView {
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactorsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserFactorView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordFactorView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub id: AggregateId,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
    pub sequence: u64,
    /// Absent while no factor is verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factors: Option<FactorsView>,
    pub metadata: BTreeMap<String, Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub details: Details,
    pub session_id: AggregateId,
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetSessionResponse {
    pub details: Details,
    pub session_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteSessionResponse {
    pub details: Details,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetSessionResponse {
    pub session: SessionView,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    pub details: ListDetails,
    pub sessions: Vec<SessionView>,
}
