//! Session write model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use sigil_core::UserId;
use sigil_events::{EventEnvelope, Reducer, WriteModel};

use crate::events::{self, Metadata, SessionEvent};
use crate::token::verify_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserFactor {
    pub user_id: UserId,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PasswordFactor {
    pub checked_at: DateTime<Utc>,
}

/// Lifecycle state, derived from the factors rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Not created yet.
    Unspecified,
    Created,
    PartiallyVerified,
    FullyVerified,
    Terminated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token_hash: Option<String>,
    user_agent: Option<String>,
    user_factor: Option<UserFactor>,
    password_factor: Option<PasswordFactor>,
    metadata: Metadata,
    terminated: bool,
}

impl Reducer for Session {
    type Event = SessionEvent;
    const AGGREGATE_TYPE: &'static str = events::AGGREGATE_TYPE;

    fn reduce(&mut self, event: &EventEnvelope<SessionEvent>) {
        match &event.payload {
            SessionEvent::Added(e) => {
                self.token_hash = Some(e.token_hash.clone());
                self.user_agent = e.user_agent.clone();
            }
            SessionEvent::UserChecked(e) => {
                self.user_factor = Some(UserFactor {
                    user_id: e.user_id,
                    checked_at: event.created_at,
                });
            }
            SessionEvent::PasswordChecked(_) => {
                self.password_factor = Some(PasswordFactor {
                    checked_at: event.created_at,
                });
            }
            SessionEvent::MetadataSet(e) => {
                for (key, value) in &e.metadata {
                    if value.is_empty() {
                        self.metadata.remove(key);
                    } else {
                        self.metadata.insert(key.clone(), value.clone());
                    }
                }
            }
            SessionEvent::Terminated(_) => self.terminated = true,
        }
    }

    fn is_removed(&self) -> bool {
        self.terminated
    }
}

impl Session {
    pub fn exists(&self) -> bool {
        self.token_hash.is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn user_factor(&self) -> Option<&UserFactor> {
        self.user_factor.as_ref()
    }

    pub fn password_factor(&self) -> Option<&PasswordFactor> {
        self.password_factor.as_ref()
    }

    /// User the session is bound to by a verified user check.
    pub fn user_id(&self) -> Option<UserId> {
        self.user_factor.map(|f| f.user_id)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn verify_token(&self, presented: &str) -> bool {
        self.token_hash
            .as_deref()
            .is_some_and(|hash| verify_token(presented, hash))
    }

    pub fn lifecycle(&self) -> SessionState {
        if self.terminated {
            return SessionState::Terminated;
        }
        if !self.exists() {
            return SessionState::Unspecified;
        }
        match (self.user_factor.is_some(), self.password_factor.is_some()) {
            (true, true) => SessionState::FullyVerified,
            (false, false) => SessionState::Created,
            _ => SessionState::PartiallyVerified,
        }
    }
}

pub type SessionWriteModel = WriteModel<Session>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MetadataSet, PasswordChecked, SessionAdded, SessionTerminated, UserChecked};
    use crate::token::SessionToken;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use sigil_core::{AggregateId, Editor, TenantId};
    use sigil_events::Event;
    use uuid::Uuid;

    fn envelope(
        id: AggregateId,
        sequence: u64,
        payload: SessionEvent,
    ) -> EventEnvelope<SessionEvent> {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        EventEnvelope {
            event_id: Uuid::nil(),
            tenant_id: TenantId::from_uuid(Uuid::nil()),
            aggregate_id: id,
            aggregate_type: events::AGGREGATE_TYPE.to_string(),
            event_type: payload.event_type().to_string(),
            schema_version: payload.schema_version(),
            sequence,
            created_at: base + Duration::seconds(sequence as i64),
            editor: Editor {
                user_id: UserId::from_uuid(Uuid::nil()),
                service: "test".to_string(),
            },
            payload,
        }
    }

    fn added(token: &SessionToken) -> SessionEvent {
        SessionEvent::Added(SessionAdded {
            token_hash: token.hash(),
            user_agent: None,
        })
    }

    #[test]
    fn factors_take_the_commit_timestamp() {
        let id = AggregateId::new();
        let token = SessionToken::mint();
        let user_id = UserId::new();
        let history = vec![
            envelope(id, 1, added(&token)),
            envelope(id, 2, SessionEvent::UserChecked(UserChecked { user_id })),
            envelope(id, 3, SessionEvent::PasswordChecked(PasswordChecked {})),
        ];

        let mut wm = SessionWriteModel::new(id);
        wm.reduce(&history);

        let session = wm.state();
        assert_eq!(session.lifecycle(), SessionState::FullyVerified);
        assert_eq!(session.user_id(), Some(user_id));
        assert_eq!(
            session.user_factor().unwrap().checked_at,
            history[1].created_at
        );
        assert_eq!(
            session.password_factor().unwrap().checked_at,
            history[2].created_at
        );
        assert!(session.verify_token(token.as_str()));
        assert!(!session.verify_token("other"));
    }

    #[test]
    fn states_follow_factors_and_termination() {
        let id = AggregateId::new();
        let token = SessionToken::mint();
        let mut wm = SessionWriteModel::new(id);
        assert_eq!(wm.state().lifecycle(), SessionState::Unspecified);

        wm.apply(&envelope(id, 1, added(&token)));
        assert_eq!(wm.state().lifecycle(), SessionState::Created);

        wm.apply(&envelope(
            id,
            2,
            SessionEvent::PasswordChecked(PasswordChecked {}),
        ));
        assert_eq!(wm.state().lifecycle(), SessionState::PartiallyVerified);

        wm.apply(&envelope(id, 3, SessionEvent::Terminated(SessionTerminated {})));
        assert_eq!(wm.state().lifecycle(), SessionState::Terminated);
        assert!(wm.is_removed());
    }

    #[test]
    fn metadata_upserts_and_empty_values_remove() {
        let id = AggregateId::new();
        let mut wm = SessionWriteModel::new(id);
        wm.apply(&envelope(id, 1, added(&SessionToken::mint())));
        wm.apply(&envelope(
            id,
            2,
            SessionEvent::MetadataSet(MetadataSet {
                metadata: Metadata::from([
                    ("a".to_string(), b"1".to_vec()),
                    ("b".to_string(), b"2".to_vec()),
                ]),
            }),
        ));
        wm.apply(&envelope(
            id,
            3,
            SessionEvent::MetadataSet(MetadataSet {
                metadata: Metadata::from([
                    ("a".to_string(), vec![]),
                    ("b".to_string(), b"3".to_vec()),
                ]),
            }),
        ));
        assert_eq!(
            wm.state().metadata(),
            &Metadata::from([("b".to_string(), b"3".to_vec())])
        );
    }

    fn arb_event() -> impl Strategy<Value = SessionEvent> {
        prop_oneof![
            Just(SessionEvent::PasswordChecked(PasswordChecked {})),
            any::<u128>().prop_map(|n| SessionEvent::UserChecked(UserChecked {
                user_id: UserId::from_uuid(Uuid::from_u128(n)),
            })),
            proptest::collection::btree_map("[a-c]", proptest::collection::vec(any::<u8>(), 0..3), 0..3)
                .prop_map(|metadata| SessionEvent::MetadataSet(MetadataSet { metadata })),
        ]
    }

    proptest! {
        #[test]
        fn replay_is_deterministic(tail in proptest::collection::vec(arb_event(), 0..20)) {
            let id = AggregateId::new();
            let mut payloads = vec![SessionEvent::Added(SessionAdded {
                token_hash: "h".to_string(),
                user_agent: None,
            })];
            payloads.extend(tail);
            let history: Vec<_> = payloads
                .into_iter()
                .enumerate()
                .map(|(i, p)| envelope(id, i as u64 + 1, p))
                .collect();

            let mut a = SessionWriteModel::new(id);
            a.reduce(&history);
            let mut b = SessionWriteModel::new(id);
            b.reduce(&history);

            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.sequence(), history.len() as u64);
        }
    }
}
