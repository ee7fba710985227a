//! Org-domain events and their registry.

use serde::{Deserialize, Serialize};

use sigil_events::{Event, EventRegistry, RegistryError};

use crate::sealed::SealedValue;

pub const AGGREGATE_TYPE: &str = "org";

pub const DOMAIN_ADDED: &str = "org.domain.added";
pub const DOMAIN_VERIFICATION_ADDED: &str = "org.domain.verification.added";
pub const DOMAIN_VERIFICATION_FAILED: &str = "org.domain.verification.failed";
pub const DOMAIN_VERIFIED: &str = "org.domain.verified";
pub const DOMAIN_PRIMARY_SET: &str = "org.domain.primary.set";
pub const DOMAIN_REMOVED: &str = "org.domain.removed";

/// How ownership of a domain is proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainValidationType {
    /// A file served over HTTP at a well-known path.
    Http,
    /// A TXT record.
    Dns,
}

/// Payload of every event that only names a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRef {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainVerificationAdded {
    pub domain: String,
    pub validation_type: DomainValidationType,
    pub validation_code: SealedValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OrgDomainEvent {
    Added(DomainRef),
    VerificationAdded(DomainVerificationAdded),
    VerificationFailed(DomainRef),
    Verified(DomainRef),
    PrimarySet(DomainRef),
    Removed(DomainRef),
}

impl OrgDomainEvent {
    pub fn domain(&self) -> &str {
        match self {
            OrgDomainEvent::VerificationAdded(e) => &e.domain,
            OrgDomainEvent::Added(e)
            | OrgDomainEvent::VerificationFailed(e)
            | OrgDomainEvent::Verified(e)
            | OrgDomainEvent::PrimarySet(e)
            | OrgDomainEvent::Removed(e) => &e.domain,
        }
    }
}

impl Event for OrgDomainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrgDomainEvent::Added(_) => DOMAIN_ADDED,
            OrgDomainEvent::VerificationAdded(_) => DOMAIN_VERIFICATION_ADDED,
            OrgDomainEvent::VerificationFailed(_) => DOMAIN_VERIFICATION_FAILED,
            OrgDomainEvent::Verified(_) => DOMAIN_VERIFIED,
            OrgDomainEvent::PrimarySet(_) => DOMAIN_PRIMARY_SET,
            OrgDomainEvent::Removed(_) => DOMAIN_REMOVED,
        }
    }

    fn schema_version(&self) -> u32 {
        1
    }
}

pub fn org_registry() -> Result<EventRegistry<OrgDomainEvent>, RegistryError> {
    let mut registry = EventRegistry::new();
    registry.register_payload(AGGREGATE_TYPE, DOMAIN_ADDED, 1, OrgDomainEvent::Added)?;
    registry.register_payload(
        AGGREGATE_TYPE,
        DOMAIN_VERIFICATION_ADDED,
        1,
        OrgDomainEvent::VerificationAdded,
    )?;
    registry.register_payload(
        AGGREGATE_TYPE,
        DOMAIN_VERIFICATION_FAILED,
        1,
        OrgDomainEvent::VerificationFailed,
    )?;
    registry.register_payload(AGGREGATE_TYPE, DOMAIN_VERIFIED, 1, OrgDomainEvent::Verified)?;
    registry.register_payload(AGGREGATE_TYPE, DOMAIN_PRIMARY_SET, 1, OrgDomainEvent::PrimarySet)?;
    registry.register_payload(AGGREGATE_TYPE, DOMAIN_REMOVED, 1, OrgDomainEvent::Removed)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use sigil_core::{AggregateId, Editor, TenantId, UserId};
    use sigil_events::RawEvent;
    use uuid::Uuid;

    fn raw(event: &OrgDomainEvent) -> RawEvent {
        RawEvent {
            event_id: Uuid::now_v7(),
            tenant_id: TenantId::new(),
            aggregate_id: AggregateId::new(),
            aggregate_type: AGGREGATE_TYPE.to_string(),
            event_type: event.event_type().to_string(),
            schema_version: event.schema_version(),
            sequence: 1,
            created_at: Utc::now(),
            editor: Editor {
                user_id: UserId::new(),
                service: "test".to_string(),
            },
            payload: serde_json::to_value(event).unwrap(),
        }
    }

    #[test]
    fn every_emitted_event_is_decodable() {
        let registry = org_registry().unwrap();
        let domain = || DomainRef {
            domain: "a.example.com".to_string(),
        };
        let events = vec![
            OrgDomainEvent::Added(domain()),
            OrgDomainEvent::VerificationAdded(DomainVerificationAdded {
                domain: "a.example.com".to_string(),
                validation_type: DomainValidationType::Dns,
                validation_code: SealedValue::new("aes-gcm", "key-1", b"sealed".to_vec()),
            }),
            OrgDomainEvent::VerificationFailed(domain()),
            OrgDomainEvent::Verified(domain()),
            OrgDomainEvent::PrimarySet(domain()),
            OrgDomainEvent::Removed(domain()),
        ];
        for event in events {
            let decoded = registry.decode(&raw(&event)).unwrap();
            assert_eq!(decoded.payload, event);
        }
    }

    #[test]
    fn validation_type_is_snake_case_on_the_wire() {
        let payload = serde_json::to_value(DomainVerificationAdded {
            domain: "a.example.com".to_string(),
            validation_type: DomainValidationType::Http,
            validation_code: SealedValue::new("aes-gcm", "key-1", vec![1, 2, 3]),
        })
        .unwrap();
        assert_eq!(payload["validation_type"], json!("http"));
    }
}
