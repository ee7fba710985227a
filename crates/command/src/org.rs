//! Org-domain commands.
//!
//! All domains of an org live on the org's stream, so every command validates
//! against the complete current domain set before emitting anything.

use tracing::info;

use sigil_core::{AggregateId, CallerContext, DomainError, DomainResult, ObjectDetails};
use sigil_infra::EventStore;
use sigil_org::{
    DomainValidationType, OrgDomainEvent, OrgDomains, OrgDomainsWriteModel, SealedValue,
    decide_add_domain, decide_add_verification, decide_fail_verification, decide_remove,
    decide_set_primary, decide_verify, normalize_domain,
};

use crate::{Commands, object_details};

impl<S, D> Commands<S, D>
where
    S: EventStore,
{
    fn execute_org<F>(&self, ctx: &CallerContext, org_id: AggregateId, decide: F) -> DomainResult<ObjectDetails>
    where
        F: FnMut(&OrgDomainsWriteModel) -> DomainResult<Vec<OrgDomainEvent>>,
    {
        let executed = self
            .engine
            .execute::<OrgDomains, _>(ctx, org_id, &self.orgs, decide)
            .map_err(DomainError::from)?;
        for event in &executed.pushed {
            info!(
                org_id = %org_id,
                event_type = %event.event_type,
                domain = event.payload.domain(),
                sequence = event.sequence,
                "org domain event pushed"
            );
        }
        object_details(&executed.write_model)
    }

    pub fn add_domain(
        &self,
        ctx: &CallerContext,
        org_id: AggregateId,
        domain: &str,
    ) -> DomainResult<ObjectDetails> {
        let domain = normalize_domain(domain)?;
        let policy = self.domain_policy;
        self.execute_org(ctx, org_id, |org| decide_add_domain(org, &domain, policy))
    }

    /// Record a pending verification challenge for an unverified domain.
    pub fn add_domain_verification(
        &self,
        ctx: &CallerContext,
        org_id: AggregateId,
        domain: &str,
        validation_type: DomainValidationType,
        validation_code: SealedValue,
    ) -> DomainResult<ObjectDetails> {
        let domain = normalize_domain(domain)?;
        self.execute_org(ctx, org_id, |org| {
            decide_add_verification(org, &domain, validation_type, validation_code.clone())
        })
    }

    pub fn verify_domain(
        &self,
        ctx: &CallerContext,
        org_id: AggregateId,
        domain: &str,
    ) -> DomainResult<ObjectDetails> {
        let domain = normalize_domain(domain)?;
        self.execute_org(ctx, org_id, |org| decide_verify(org, &domain))
    }

    pub fn fail_domain_verification(
        &self,
        ctx: &CallerContext,
        org_id: AggregateId,
        domain: &str,
    ) -> DomainResult<ObjectDetails> {
        let domain = normalize_domain(domain)?;
        self.execute_org(ctx, org_id, |org| decide_fail_verification(org, &domain))
    }

    pub fn set_primary_domain(
        &self,
        ctx: &CallerContext,
        org_id: AggregateId,
        domain: &str,
    ) -> DomainResult<ObjectDetails> {
        let domain = normalize_domain(domain)?;
        self.execute_org(ctx, org_id, |org| decide_set_primary(org, &domain))
    }

    /// Remove a domain; removing the primary requires `promote`, which is made
    /// primary in the same batch.
    pub fn remove_domain(
        &self,
        ctx: &CallerContext,
        org_id: AggregateId,
        domain: &str,
        promote: Option<&str>,
    ) -> DomainResult<ObjectDetails> {
        let domain = normalize_domain(domain)?;
        let promote = promote.map(normalize_domain).transpose()?;
        self.execute_org(ctx, org_id, |org| {
            decide_remove(org, &domain, promote.as_deref())
        })
    }

    pub fn org_domains(&self, ctx: &CallerContext, org_id: AggregateId) -> DomainResult<OrgDomainsWriteModel> {
        if ctx.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        self.engine
            .load::<OrgDomains>(ctx.tenant_id(), org_id, &self.orgs)
            .map_err(DomainError::from)
    }
}
