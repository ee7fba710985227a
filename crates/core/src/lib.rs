//! `sigil-core`: identity/access-management domain foundation.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod error;
pub mod id;

pub use aggregate::{ExpectedSequence, ObjectDetails};
pub use context::{CallerContext, CancellationToken, Editor};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, TenantId, UserId};
