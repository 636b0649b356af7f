//! Authorization material carried alongside a store operation.

use super::ids::OwnerId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Caller-supplied credential naming the owner the gateway acts for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BearerToken {
    issuer: OwnerId,
    expires_at: Option<i64>,
}

impl BearerToken {
    pub fn new(issuer: OwnerId, expires_at: Option<i64>) -> Self {
        Self { issuer, expires_at }
    }

    pub fn issuer(&self) -> &OwnerId {
        &self.issuer
    }

    /// Tokens without an expiration never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now.timestamp())
    }
}

/// Short-lived credential bound to one leased connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn issue(owner_id: OwnerId, lifetime: chrono::Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            expires_at: Utc::now() + lifetime,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_expiration() {
        let owner: OwnerId = "alice".parse().unwrap();
        let now = Utc::now();
        let open = BearerToken::new(owner.clone(), None);
        let stale = BearerToken::new(owner.clone(), Some(now.timestamp() - 1));
        let fresh = BearerToken::new(owner, Some(now.timestamp() + 60));
        assert!(!open.is_expired(now));
        assert!(stale.is_expired(now));
        assert!(!fresh.is_expired(now));
    }

    #[test]
    fn sessions_are_unique() {
        let owner: OwnerId = "gateway".parse().unwrap();
        let a = SessionToken::issue(owner.clone(), chrono::Duration::seconds(30));
        let b = SessionToken::issue(owner, chrono::Duration::seconds(30));
        assert_ne!(a.id, b.id);
        assert!(!a.is_expired(Utc::now()));
    }
}
