//! Org-domain command decisions against the replayed domain set.

use serde::{Deserialize, Serialize};

use sigil_core::{DomainError, DomainResult};

use crate::domains::{OrgDomain, OrgDomainsWriteModel};
use crate::events::{DomainRef, DomainValidationType, DomainVerificationAdded, OrgDomainEvent};
use crate::sealed::SealedValue;

/// Org-level domain policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgDomainPolicy {
    /// If false, added domains count as verified immediately.
    pub validate_org_domains: bool,
}

impl Default for OrgDomainPolicy {
    fn default() -> Self {
        Self {
            validate_org_domains: true,
        }
    }
}

/// Trimmed, lower-cased domain name.
pub fn normalize_domain(domain: &str) -> DomainResult<String> {
    let domain = domain.trim().to_ascii_lowercase();
    if domain.is_empty() {
        return Err(DomainError::invalid_argument("domain is empty"));
    }
    if domain.chars().any(char::is_whitespace) {
        return Err(DomainError::invalid_argument("domain contains whitespace"));
    }
    Ok(domain)
}

fn domain_ref(domain: &str) -> DomainRef {
    DomainRef {
        domain: domain.to_string(),
    }
}

/// Look up an active domain; unknown → `NotFound`, removed → `AggregateRemoved`.
fn active_domain<'a>(org: &'a OrgDomainsWriteModel, domain: &str) -> DomainResult<&'a OrgDomain> {
    match org.state().get(domain) {
        None => Err(DomainError::not_found(format!("domain {domain} not found"))),
        Some(d) if !d.is_active() => Err(DomainError::removed(format!("domain {domain} is removed"))),
        Some(d) => Ok(d),
    }
}

pub fn decide_add_domain(
    org: &OrgDomainsWriteModel,
    domain: &str,
    policy: OrgDomainPolicy,
) -> DomainResult<Vec<OrgDomainEvent>> {
    if org.state().get(domain).is_some_and(OrgDomain::is_active) {
        return Err(DomainError::invalid_argument(format!(
            "domain {domain} already exists"
        )));
    }
    let mut events = vec![OrgDomainEvent::Added(domain_ref(domain))];
    if !policy.validate_org_domains {
        events.push(OrgDomainEvent::Verified(domain_ref(domain)));
    }
    Ok(events)
}

pub fn decide_add_verification(
    org: &OrgDomainsWriteModel,
    domain: &str,
    validation_type: DomainValidationType,
    validation_code: SealedValue,
) -> DomainResult<Vec<OrgDomainEvent>> {
    let current = active_domain(org, domain)?;
    if current.verified {
        return Err(DomainError::invalid_argument(format!(
            "domain {domain} is already verified"
        )));
    }
    Ok(vec![OrgDomainEvent::VerificationAdded(DomainVerificationAdded {
        domain: domain.to_string(),
        validation_type,
        validation_code,
    })])
}

fn ensure_pending(org: &OrgDomainsWriteModel, domain: &str) -> DomainResult<()> {
    let current = active_domain(org, domain)?;
    if current.pending.is_none() {
        return Err(DomainError::invalid_argument(format!(
            "domain {domain} has no pending verification"
        )));
    }
    Ok(())
}

pub fn decide_verify(org: &OrgDomainsWriteModel, domain: &str) -> DomainResult<Vec<OrgDomainEvent>> {
    ensure_pending(org, domain)?;
    Ok(vec![OrgDomainEvent::Verified(domain_ref(domain))])
}

pub fn decide_fail_verification(
    org: &OrgDomainsWriteModel,
    domain: &str,
) -> DomainResult<Vec<OrgDomainEvent>> {
    ensure_pending(org, domain)?;
    Ok(vec![OrgDomainEvent::VerificationFailed(domain_ref(domain))])
}

/// Setting the current primary again is a no-op.
pub fn decide_set_primary(
    org: &OrgDomainsWriteModel,
    domain: &str,
) -> DomainResult<Vec<OrgDomainEvent>> {
    let current = active_domain(org, domain)?;
    if !current.verified {
        return Err(DomainError::invalid_argument(format!(
            "domain {domain} is not verified"
        )));
    }
    if current.primary {
        return Ok(vec![]);
    }
    Ok(vec![OrgDomainEvent::PrimarySet(domain_ref(domain))])
}

/// Remove a domain. The primary can only go if `promote` names another
/// domain, which becomes primary in the same batch. `promote` is refused for
/// any other domain.
pub fn decide_remove(
    org: &OrgDomainsWriteModel,
    domain: &str,
    promote: Option<&str>,
) -> DomainResult<Vec<OrgDomainEvent>> {
    let current = active_domain(org, domain)?;
    let mut events = Vec::new();
    if current.primary {
        let Some(promote) = promote else {
            return Err(DomainError::invalid_argument(format!(
                "domain {domain} is the primary domain"
            )));
        };
        if promote == domain {
            return Err(DomainError::invalid_argument(
                "cannot promote the domain being removed",
            ));
        }
        events.extend(decide_set_primary(org, promote)?);
    } else if let Some(promote) = promote {
        return Err(DomainError::invalid_argument(format!(
            "domain {domain} is not the primary domain, {promote} cannot be promoted in its place"
        )));
    }
    events.push(OrgDomainEvent::Removed(domain_ref(domain)));
    Ok(events)
}
