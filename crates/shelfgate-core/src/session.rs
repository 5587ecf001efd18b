//! Kiosk session context.
//!
//! A session remembers who was verified at the kiosk and when. It expires
//! after a fixed time-to-live and is cleared only by an explicit `logout`.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// A person whose face was matched at the kiosk.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPerson {
    pub person_id: i64,
    pub name: String,
    pub verified_at: DateTime<Utc>,
}

/// Why a session cannot be used for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    NotVerified,
    Expired,
}

#[derive(Debug)]
pub struct KioskSession {
    id: Uuid,
    ttl: Duration,
    verified: Option<VerifiedPerson>,
}

impl KioskSession {
    pub fn new(ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            ttl,
            verified: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Record a successful verification. Replaces any earlier person.
    pub fn begin(&mut self, person_id: i64, name: &str, now: DateTime<Utc>) {
        self.id = Uuid::new_v4();
        tracing::info!(session = %self.id, person = name, "session started");
        self.verified = Some(VerifiedPerson {
            person_id,
            name: name.to_string(),
            verified_at: now,
        });
    }

    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        match &self.verified {
            None => SessionState::NotVerified,
            Some(p) if now - p.verified_at > self.ttl => SessionState::Expired,
            Some(_) => SessionState::Active,
        }
    }

    /// The verified person, if the session has not expired.
    pub fn active(&self, now: DateTime<Utc>) -> Option<&VerifiedPerson> {
        match self.state(now) {
            SessionState::Active => self.verified.as_ref(),
            _ => None,
        }
    }

    pub fn logout(&mut self) -> Option<VerifiedPerson> {
        let person = self.verified.take();
        if let Some(p) = &person {
            tracing::info!(session = %self.id, person = %p.name, "session ended");
        }
        person
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_new_session_is_not_verified() {
        let session = KioskSession::new(Duration::seconds(60));
        assert_eq!(session.state(t0()), SessionState::NotVerified);
        assert!(session.active(t0()).is_none());
    }

    #[test]
    fn test_begin_then_active() {
        let mut session = KioskSession::new(Duration::seconds(60));
        session.begin(1, "Alice", t0());
        let person = session.active(t0() + Duration::seconds(30)).unwrap();
        assert_eq!(person.name, "Alice");
        assert_eq!(person.person_id, 1);
    }

    #[test]
    fn test_expiry() {
        let mut session = KioskSession::new(Duration::seconds(60));
        session.begin(1, "Alice", t0());
        assert_eq!(session.state(t0() + Duration::seconds(60)), SessionState::Active);
        assert_eq!(session.state(t0() + Duration::seconds(61)), SessionState::Expired);
        assert!(session.active(t0() + Duration::seconds(61)).is_none());
    }

    #[test]
    fn test_logout_clears() {
        let mut session = KioskSession::new(Duration::seconds(60));
        session.begin(2, "Bob", t0());
        let first_id = session.id();
        assert_eq!(session.logout().map(|p| p.name), Some("Bob".into()));
        assert_eq!(session.state(t0()), SessionState::NotVerified);
        assert!(session.logout().is_none());

        session.begin(3, "Carol", t0());
        assert_ne!(session.id(), first_id);
    }
}
