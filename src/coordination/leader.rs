//! Leader election over a shared lease
//!
//! Exactly one process runs orchestration cycles. Every process runs a
//! renewal task that calls [`LeaderElector::try_acquire_or_renew`] every
//! `lease_duration / repoll_divisor` and publishes a [`Leadership`] on a
//! watch channel; the scheduler only ticks while that value is within its
//! local deadline.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::shutdown::ShutdownToken;
use crate::config::LeaderConfig;
use crate::domain::LeaseToken;
use crate::error::Result;

/// Shared exclusive lock keyed by resource name
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Grant or extend the lease to `owner`. `None` when someone else holds a live lease.
    async fn acquire_or_renew(
        &self,
        resource: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<LeaseToken>>;

    /// Drop the lease if `owner` holds it
    async fn release(&self, resource: &str, owner: &str) -> Result<bool>;
}

/// A held lease as seen by this process.
///
/// `deadline` is measured on the local monotonic clock from the moment the
/// acquire or renew request was sent, so it never outlives the lease the
/// backend granted regardless of how far the wall clocks drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leadership {
    pub token: LeaseToken,
    pub deadline: Instant,
}

impl Leadership {
    pub fn new(token: LeaseToken, deadline: Instant) -> Self {
        Self { token, deadline }
    }

    /// Leadership good for `valid_for` from now
    pub fn for_duration(token: LeaseToken, valid_for: Duration) -> Self {
        Self::new(token, Instant::now() + valid_for)
    }

    pub fn is_valid(&self) -> bool {
        Instant::now() < self.deadline
    }
}

/// Publish `next`, waking receivers whenever it differs from what they hold.
///
/// A renewal moves the deadline, so every successful renewal notifies.
pub fn publish_leadership(
    leadership: &watch::Sender<Option<Leadership>>,
    next: Option<Leadership>,
) -> bool {
    leadership.send_if_modified(|held| {
        let changed = *held != next;
        *held = next;
        changed
    })
}

/// `host-pid-shortuuid`, unique per process start
pub fn default_owner_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, std::process::id(), &suffix[..8])
}

pub struct LeaderElector {
    backend: Arc<dyn LeaseBackend>,
    resource: String,
    owner_id: String,
    lease_duration: Duration,
    current: Option<LeaseToken>,
    deadline: Option<Instant>,
}

impl LeaderElector {
    pub fn new(backend: Arc<dyn LeaseBackend>, config: &LeaderConfig) -> Self {
        let owner_id = config.owner_id.clone().unwrap_or_else(default_owner_id);
        Self::with_owner(
            backend,
            &config.resource,
            &owner_id,
            config.lease_duration(),
        )
    }

    pub fn with_owner(
        backend: Arc<dyn LeaseBackend>,
        resource: &str,
        owner_id: &str,
        lease_duration: Duration,
    ) -> Self {
        Self {
            backend,
            resource: resource.to_string(),
            owner_id: owner_id.to_string(),
            lease_duration,
            current: None,
            deadline: None,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The current lease with its local deadline
    pub fn leadership(&self) -> Option<Leadership> {
        let token = self.current.clone()?;
        let deadline = self.deadline?;
        Some(Leadership::new(token, deadline))
    }

    pub fn is_leader_at(&self, now: chrono::DateTime<Utc>) -> bool {
        self.current.as_ref().is_some_and(|t| t.is_valid_at(now))
    }

    /// Acquire the lease, or extend it if already held.
    ///
    /// Backend errors count as "not leader this tick" and are never propagated.
    pub async fn try_acquire_or_renew(&mut self) -> Option<LeaseToken> {
        let was_leader = self.current.is_some();
        let sent_at = Instant::now();

        let token = match self
            .backend
            .acquire_or_renew(&self.resource, &self.owner_id, self.lease_duration)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!("Lease backend error, treating as not leader: {}", e);
                None
            }
        };

        match (&token, was_leader) {
            (Some(t), false) => info!(
                owner = %self.owner_id,
                expires_at = %t.expires_at,
                "Acquired leadership of {}", self.resource
            ),
            (None, true) => warn!(owner = %self.owner_id, "Lost leadership of {}", self.resource),
            (Some(t), true) => debug!(expires_at = %t.expires_at, "Lease renewed"),
            (None, false) => debug!("Standing by, {} held elsewhere", self.resource),
        }

        self.deadline = token.as_ref().map(|_| sent_at + self.lease_duration);
        self.current = token.clone();
        token
    }

    /// Give the lease back so a standby can take over before expiry
    pub async fn release(&mut self) -> bool {
        self.deadline = None;
        if self.current.take().is_none() {
            return false;
        }
        match self.backend.release(&self.resource, &self.owner_id).await {
            Ok(released) => released,
            Err(e) => {
                warn!("Failed to release lease: {}", e);
                false
            }
        }
    }
}

/// Renew (or contend for) the lease every `interval` and publish the latest
/// leadership. On shutdown publishes `None` and hands the elector back so the
/// caller can release the lease once the in-flight cycle has drained.
pub async fn run_renewal(
    mut elector: LeaderElector,
    interval: Duration,
    leadership: watch::Sender<Option<Leadership>>,
    mut shutdown: ShutdownToken,
) -> LeaderElector {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        owner = %elector.owner_id(),
        "Leader election started (re-poll every {:?})", interval
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                elector.try_acquire_or_renew().await;
                publish_leadership(&leadership, elector.leadership());
            }
        }
    }

    leadership.send_replace(None);
    elector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryLeaseBackend;
    use crate::error::LivescoreError;

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_renewal_is_idempotent_while_held() {
        let backend = Arc::new(MemoryLeaseBackend::new());
        let mut elector = LeaderElector::with_owner(backend, "poller", "a", LEASE);

        let first = elector.try_acquire_or_renew().await.unwrap();
        let second = elector.try_acquire_or_renew().await.unwrap();
        assert_eq!(first.acquired_at, second.acquired_at);
        assert!(second.expires_at >= first.expires_at);
        assert!(elector.is_leader_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_backend_error_means_not_leader() {
        let mut backend = MockLeaseBackend::new();
        backend
            .expect_acquire_or_renew()
            .returning(|_, _, _| Err(LivescoreError::Internal("connection reset".to_string())));

        let mut elector = LeaderElector::with_owner(Arc::new(backend), "poller", "a", LEASE);
        assert!(elector.try_acquire_or_renew().await.is_none());
        assert!(!elector.is_leader_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_release_hands_over_immediately() {
        let backend = Arc::new(MemoryLeaseBackend::new());
        let mut a = LeaderElector::with_owner(backend.clone(), "poller", "a", LEASE);
        let mut b = LeaderElector::with_owner(backend, "poller", "b", LEASE);

        assert!(a.try_acquire_or_renew().await.is_some());
        assert!(b.try_acquire_or_renew().await.is_none());

        assert!(a.release().await);
        assert!(!a.release().await);
        assert!(b.try_acquire_or_renew().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_runs_from_the_request() {
        let backend = Arc::new(MemoryLeaseBackend::new());
        let mut elector = LeaderElector::with_owner(backend, "poller", "a", LEASE);
        assert!(elector.leadership().is_none());

        let before = Instant::now();
        elector.try_acquire_or_renew().await.unwrap();
        let held = elector.leadership().unwrap();
        assert_eq!(held.deadline, before + LEASE);
        assert!(held.is_valid());

        tokio::time::advance(LEASE).await;
        assert!(!held.is_valid());

        elector.release().await;
        assert!(elector.leadership().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_notifies_even_when_already_leader() {
        let backend = Arc::new(MemoryLeaseBackend::new());
        let mut elector = LeaderElector::with_owner(backend, "poller", "a", LEASE);
        let (tx, mut rx) = watch::channel(None);

        elector.try_acquire_or_renew().await;
        assert!(publish_leadership(&tx, elector.leadership()));
        rx.borrow_and_update();

        // Same value again is not news
        assert!(!publish_leadership(&tx, elector.leadership()));
        assert!(!rx.has_changed().unwrap());

        tokio::time::advance(Duration::from_secs(10)).await;
        elector.try_acquire_or_renew().await;
        assert!(publish_leadership(&tx, elector.leadership()));
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_default_owner_id_is_unique() {
        assert_ne!(default_owner_id(), default_owner_id());
    }
}
