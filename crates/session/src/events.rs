//! Session events and their registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use sigil_core::UserId;
use sigil_events::{Event, EventRegistry, RegistryError};

pub const AGGREGATE_TYPE: &str = "session";

pub const SESSION_ADDED: &str = "session.added";
pub const USER_CHECKED: &str = "session.user.checked";
pub const PASSWORD_CHECKED: &str = "session.password.checked";
pub const METADATA_SET: &str = "session.metadata.set";
pub const TERMINATED: &str = "session.terminated";

/// Opaque key/value metadata attached to a session by the client.
pub type Metadata = BTreeMap<String, Vec<u8>>;

/// A session was created. Only the hash of its token is persisted.
///
/// Schema v2 added `user_agent`; v1 payloads decode with `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAdded {
    pub token_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// The user factor was verified. The check time is the commit timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChecked {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordChecked {}

/// Keys with an empty value are removed, all others are upserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSet {
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTerminated {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SessionEvent {
    Added(SessionAdded),
    UserChecked(UserChecked),
    PasswordChecked(PasswordChecked),
    MetadataSet(MetadataSet),
    Terminated(SessionTerminated),
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Added(_) => SESSION_ADDED,
            SessionEvent::UserChecked(_) => USER_CHECKED,
            SessionEvent::PasswordChecked(_) => PASSWORD_CHECKED,
            SessionEvent::MetadataSet(_) => METADATA_SET,
            SessionEvent::Terminated(_) => TERMINATED,
        }
    }

    fn schema_version(&self) -> u32 {
        match self {
            SessionEvent::Added(_) => 2,
            _ => 1,
        }
    }
}

/// Decoders for every session event type and schema version ever written.
pub fn session_registry() -> Result<EventRegistry<SessionEvent>, RegistryError> {
    let mut registry = EventRegistry::new();
    registry.register_payload(AGGREGATE_TYPE, SESSION_ADDED, 1, SessionEvent::Added)?;
    registry.register_payload(AGGREGATE_TYPE, SESSION_ADDED, 2, SessionEvent::Added)?;
    registry.register_payload(AGGREGATE_TYPE, USER_CHECKED, 1, SessionEvent::UserChecked)?;
    registry.register_payload(
        AGGREGATE_TYPE,
        PASSWORD_CHECKED,
        1,
        SessionEvent::PasswordChecked,
    )?;
    registry.register_payload(AGGREGATE_TYPE, METADATA_SET, 1, SessionEvent::MetadataSet)?;
    registry.register_payload(AGGREGATE_TYPE, TERMINATED, 1, SessionEvent::Terminated)?;
    Ok(registry)
}
