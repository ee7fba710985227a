//! Write model over all domains of one organization.
//!
//! Every domain event lives on the org's stream, so a single replay sees the
//! full set of domains. That is what makes "exactly one primary domain" a
//! check against current state instead of a cross-aggregate race.

use std::collections::BTreeMap;

use sigil_events::{EventEnvelope, Reducer, WriteModel};

use crate::events::{self, DomainValidationType, OrgDomainEvent};
use crate::sealed::SealedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    Active,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVerification {
    pub validation_type: DomainValidationType,
    pub validation_code: SealedValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgDomain {
    pub name: String,
    pub state: DomainState,
    pub verified: bool,
    pub primary: bool,
    pub pending: Option<PendingVerification>,
}

impl OrgDomain {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: DomainState::Active,
            verified: false,
            primary: false,
            pending: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == DomainState::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgDomains {
    domains: BTreeMap<String, OrgDomain>,
}

impl Reducer for OrgDomains {
    type Event = OrgDomainEvent;
    const AGGREGATE_TYPE: &'static str = events::AGGREGATE_TYPE;

    fn reduce(&mut self, event: &EventEnvelope<OrgDomainEvent>) {
        match &event.payload {
            OrgDomainEvent::Added(e) => {
                // Re-adding a removed domain starts it over.
                self.domains.insert(e.domain.clone(), OrgDomain::new(&e.domain));
            }
            OrgDomainEvent::VerificationAdded(e) => {
                if let Some(d) = self.domains.get_mut(&e.domain) {
                    d.pending = Some(PendingVerification {
                        validation_type: e.validation_type,
                        validation_code: e.validation_code.clone(),
                    });
                }
            }
            OrgDomainEvent::VerificationFailed(e) => {
                if let Some(d) = self.domains.get_mut(&e.domain) {
                    d.pending = None;
                }
            }
            OrgDomainEvent::Verified(e) => {
                if let Some(d) = self.domains.get_mut(&e.domain) {
                    d.verified = true;
                    d.pending = None;
                }
            }
            OrgDomainEvent::PrimarySet(e) => {
                for (name, d) in self.domains.iter_mut() {
                    d.primary = *name == e.domain;
                }
            }
            OrgDomainEvent::Removed(e) => {
                if let Some(d) = self.domains.get_mut(&e.domain) {
                    d.state = DomainState::Removed;
                    d.primary = false;
                    d.pending = None;
                }
            }
        }
    }
}

impl OrgDomains {
    pub fn get(&self, domain: &str) -> Option<&OrgDomain> {
        self.domains.get(domain)
    }

    /// Active domains, ordered by name.
    pub fn active(&self) -> impl Iterator<Item = &OrgDomain> {
        self.domains.values().filter(|d| d.is_active())
    }

    pub fn primary(&self) -> Option<&OrgDomain> {
        self.domains.values().find(|d| d.primary)
    }
}

pub type OrgDomainsWriteModel = WriteModel<OrgDomains>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DomainRef, DomainVerificationAdded};
    use chrono::Utc;
    use proptest::prelude::*;
    use sigil_core::{AggregateId, Editor, TenantId, UserId};
    use sigil_events::Event;
    use uuid::Uuid;

    fn replay(id: AggregateId, history: &[OrgDomainEvent]) -> OrgDomainsWriteModel {
        let mut wm = OrgDomainsWriteModel::new(id);
        for (i, e) in history.iter().enumerate() {
            wm.apply(&EventEnvelope {
                event_id: Uuid::nil(),
                tenant_id: TenantId::from_uuid(Uuid::nil()),
                aggregate_id: id,
                aggregate_type: events::AGGREGATE_TYPE.to_string(),
                event_type: e.event_type().to_string(),
                schema_version: 1,
                sequence: i as u64 + 1,
                created_at: Utc::now(),
                editor: Editor {
                    user_id: UserId::from_uuid(Uuid::nil()),
                    service: "test".to_string(),
                },
                payload: e.clone(),
            });
        }
        wm
    }

    fn d(name: &str) -> DomainRef {
        DomainRef {
            domain: name.to_string(),
        }
    }

    #[test]
    fn verification_lifecycle() {
        let wm = replay(
            AggregateId::new(),
            &[
                OrgDomainEvent::Added(d("a.example.com")),
                OrgDomainEvent::VerificationAdded(DomainVerificationAdded {
                    domain: "a.example.com".to_string(),
                    validation_type: DomainValidationType::Http,
                    validation_code: SealedValue::new("aes-gcm", "k1", vec![1]),
                }),
            ],
        );
        let domain = wm.state().get("a.example.com").unwrap();
        assert!(domain.pending.is_some());
        assert!(!domain.verified);

        let wm = replay(
            AggregateId::new(),
            &[
                OrgDomainEvent::Added(d("a.example.com")),
                OrgDomainEvent::Verified(d("a.example.com")),
            ],
        );
        let domain = wm.state().get("a.example.com").unwrap();
        assert!(domain.verified);
        assert!(domain.pending.is_none());
    }

    #[test]
    fn primary_moves_and_removal_clears_it() {
        let wm = replay(
            AggregateId::new(),
            &[
                OrgDomainEvent::Added(d("a.example.com")),
                OrgDomainEvent::Verified(d("a.example.com")),
                OrgDomainEvent::PrimarySet(d("a.example.com")),
                OrgDomainEvent::Added(d("b.example.com")),
                OrgDomainEvent::Verified(d("b.example.com")),
                OrgDomainEvent::PrimarySet(d("b.example.com")),
                OrgDomainEvent::Removed(d("a.example.com")),
            ],
        );
        let domains = wm.state();
        assert_eq!(domains.primary().unwrap().name, "b.example.com");
        assert_eq!(
            domains.get("a.example.com").unwrap().state,
            DomainState::Removed
        );
        assert_eq!(domains.active().count(), 1);
    }

    fn arb_event() -> impl Strategy<Value = OrgDomainEvent> {
        let name = prop_oneof![Just("a.example.com"), Just("b.example.com"), Just("c.example.com")];
        (0..5u8, name).prop_map(|(kind, name)| match kind {
            0 => OrgDomainEvent::Added(d(name)),
            1 => OrgDomainEvent::Verified(d(name)),
            2 => OrgDomainEvent::PrimarySet(d(name)),
            3 => OrgDomainEvent::VerificationFailed(d(name)),
            _ => OrgDomainEvent::Removed(d(name)),
        })
    }

    proptest! {
        #[test]
        fn at_most_one_primary(events in proptest::collection::vec(arb_event(), 0..30)) {
            let wm = replay(AggregateId::new(), &events);
            prop_assert!(wm.state().active().filter(|d| d.primary).count() <= 1);
            prop_assert!(wm.state().domains.values().filter(|d| d.primary).count() <= 1);
        }
    }
}
