//! `sigil-org`: organization domains.
//!
//! Domains are added, proven via a sealed validation challenge, made primary
//! and removed. All of it is recorded on the org's own event stream.

pub mod decide;
pub mod domains;
pub mod events;
pub mod sealed;

pub use decide::{
    OrgDomainPolicy, decide_add_domain, decide_add_verification, decide_fail_verification,
    decide_remove, decide_set_primary, decide_verify, normalize_domain,
};
pub use domains::{DomainState, OrgDomain, OrgDomains, OrgDomainsWriteModel, PendingVerification};
pub use events::{DomainValidationType, OrgDomainEvent, org_registry};
pub use sealed::SealedValue;
