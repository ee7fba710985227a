//! Caller context handed to every command by the API layer.
//!
//! The API layer authenticates the caller and resolves the tenant scope; the
//! core only consumes the result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Who caused an event. Recorded on every event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Editor {
    pub user_id: UserId,
    /// Service / agent the request came through (e.g. "session-api").
    #[serde(default)]
    pub service: String,
}

/// Cooperative cancellation token.
///
/// Cloning shares the flag. Cancellation is only observed at the points where
/// the engine checks it (before loading and right before pushing); once a push
/// has been issued it runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Non-blocking cancellation check.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Already-authenticated caller context.
#[derive(Debug, Clone)]
pub struct CallerContext {
    tenant_id: TenantId,
    editor: Editor,
    cancellation: CancellationToken,
}

impl CallerContext {
    pub fn new(tenant_id: TenantId, user_id: UserId, service: impl Into<String>) -> Self {
        Self {
            tenant_id,
            editor: Editor {
                user_id,
                service: service.into(),
            },
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn user_id(&self) -> UserId {
        self.editor.user_id
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
