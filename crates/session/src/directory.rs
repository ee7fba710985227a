//! User directory: the external lookup collaborator for user checks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sigil_core::{DomainError, TenantId, UserId};

/// A user as seen by the session commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login_name: String,
    pub display_name: String,
    /// Argon2 PHC string, e.g. `$argon2id$v=19$…`. `None` if the user has no
    /// password set.
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,
}

impl User {
    /// Verify `password` against the stored hash.
    pub fn verify_password(&self, password: &str) -> Result<(), DomainError> {
        let Some(stored) = self.password_hash.as_deref() else {
            return Err(DomainError::invalid_argument("user has no password set"));
        };
        let parsed = PasswordHash::new(stored).map_err(|e| {
            tracing::error!(user_id = %self.id, error = %e, "unparseable password hash");
            DomainError::Internal
        })?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| DomainError::unauthenticated("password is invalid"))
    }
}

/// Hash a clear-text password into an Argon2 PHC string.
pub fn hash_password(password: &str) -> Result<String, DomainError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "password hashing failed");
            DomainError::Internal
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("login name matches more than one user: {0}")]
    Ambiguous(String),
}

impl From<LookupError> for DomainError {
    fn from(value: LookupError) -> Self {
        DomainError::InvalidArgument(value.to_string())
    }
}

/// Read-only user lookups, scoped to a tenant.
pub trait UserDirectory: Send + Sync {
    fn find_user_by_id(&self, tenant_id: TenantId, user_id: UserId) -> Result<User, LookupError>;

    fn find_user_by_login_name(
        &self,
        tenant_id: TenantId,
        login_name: &str,
    ) -> Result<User, LookupError>;
}

impl<D> UserDirectory for Arc<D>
where
    D: UserDirectory + ?Sized,
{
    fn find_user_by_id(&self, tenant_id: TenantId, user_id: UserId) -> Result<User, LookupError> {
        (**self).find_user_by_id(tenant_id, user_id)
    }

    fn find_user_by_login_name(
        &self,
        tenant_id: TenantId,
        login_name: &str,
    ) -> Result<User, LookupError> {
        (**self).find_user_by_login_name(tenant_id, login_name)
    }
}

/// In-memory directory for tests/dev.
///
/// Login names compare case-insensitively.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<TenantId, Vec<User>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: TenantId, user: User) {
        if let Ok(mut users) = self.users.write() {
            let tenant_users = users.entry(tenant_id).or_default();
            tenant_users.retain(|u| u.id != user.id);
            tenant_users.push(user);
        }
    }

    fn with_users<T>(
        &self,
        tenant_id: TenantId,
        f: impl FnOnce(&[User]) -> Result<T, LookupError>,
    ) -> Result<T, LookupError> {
        let users = self
            .users
            .read()
            .map_err(|_| LookupError::NotFound("directory unavailable".to_string()))?;
        f(users.get(&tenant_id).map(Vec::as_slice).unwrap_or_default())
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn find_user_by_id(&self, tenant_id: TenantId, user_id: UserId) -> Result<User, LookupError> {
        self.with_users(tenant_id, |users| {
            users
                .iter()
                .find(|u| u.id == user_id)
                .cloned()
                .ok_or_else(|| LookupError::NotFound(user_id.to_string()))
        })
    }

    fn find_user_by_login_name(
        &self,
        tenant_id: TenantId,
        login_name: &str,
    ) -> Result<User, LookupError> {
        let wanted = login_name.trim();
        self.with_users(tenant_id, |users| {
            let mut matches = users
                .iter()
                .filter(|u| u.login_name.eq_ignore_ascii_case(wanted));
            let found = matches
                .next()
                .ok_or_else(|| LookupError::NotFound(wanted.to_string()))?;
            if matches.next().is_some() {
                return Err(LookupError::Ambiguous(wanted.to_string()));
            }
            Ok(found.clone())
        })
    }
}
