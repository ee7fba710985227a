//! `sigil-session`: login session aggregate.
//!
//! A session collects verified factors (user, password) under an opaque
//! token. Its state is nothing but the replay of its events.

pub mod checks;
pub mod directory;
pub mod events;
pub mod session;
pub mod token;

pub use checks::{
    ResolvedChecks, SessionCheck, UserSearch, decide_create, decide_terminate, decide_update,
    ensure_mutable, resolve_checks,
};
pub use directory::{InMemoryUserDirectory, LookupError, User, UserDirectory, hash_password};
pub use events::{Metadata, SessionEvent, session_registry};
pub use session::{PasswordFactor, Session, SessionState, SessionWriteModel, UserFactor};
pub use token::{SessionToken, hash_token, verify_token};
