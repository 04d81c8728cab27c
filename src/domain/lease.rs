use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proof of holding the poller role, as returned by the lease backend.
///
/// A token is only meaningful until `expires_at`; holders must renew before
/// then or assume someone else has taken over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseToken {
    pub resource: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}
