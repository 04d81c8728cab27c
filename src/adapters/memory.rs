//! In-process implementations of the store and the lease lock.
//!
//! Used for single-instance deployments (`database.in_memory = true`) and by
//! the test-suite. Both partitions sit behind one lock so moves are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::{MoveOutcome, Partition, Store};
use crate::coordination::LeaseBackend;
use crate::domain::{EventRecord, EventStatus, LeaseToken};
use crate::error::{LivescoreError, Result};

#[derive(Default)]
struct Partitions {
    active: HashMap<String, EventRecord>,
    history: HashMap<String, EventRecord>,
}

impl Partitions {
    fn get(&self, partition: Partition) -> &HashMap<String, EventRecord> {
        match partition {
            Partition::Active => &self.active,
            Partition::History => &self.history,
        }
    }

    fn get_mut(&mut self, partition: Partition) -> &mut HashMap<String, EventRecord> {
        match partition {
            Partition::Active => &mut self.active,
            Partition::History => &mut self.history,
        }
    }
}

/// HashMap-backed document store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Partitions>,
    failing_writes: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write touching `id` fail until [`MemoryStore::heal`] is called
    pub fn fail_writes_for(&self, id: &str) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.insert(id.to_string());
        }
    }

    pub fn heal(&self, id: &str) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.remove(id);
        }
    }

    /// Number of records held in a partition
    pub async fn len(&self, partition: Partition) -> usize {
        self.inner.read().await.get(partition).len()
    }

    fn check_writable(&self, id: &str) -> Result<()> {
        let failing = self
            .failing_writes
            .lock()
            .map(|f| f.contains(id))
            .unwrap_or(false);
        if failing {
            return Err(LivescoreError::StoreWrite {
                id: id.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert(&self, partition: Partition, record: &EventRecord) -> Result<()> {
        self.check_writable(&record.id)?;
        let mut inner = self.inner.write().await;
        inner
            .get_mut(partition)
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, partition: Partition, id: &str) -> Result<Option<EventRecord>> {
        Ok(self.inner.read().await.get(partition).get(id).cloned())
    }

    async fn query_all(&self, partition: Partition) -> Result<Vec<EventRecord>> {
        Ok(self.inner.read().await.get(partition).values().cloned().collect())
    }

    async fn query_by_status(
        &self,
        partition: Partition,
        status: EventStatus,
    ) -> Result<Vec<EventRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .get(partition)
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }

    async fn query_stale_before(
        &self,
        partition: Partition,
        before: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .get(partition)
            .values()
            .filter(|r| r.last_seen_at < before)
            .cloned()
            .collect())
    }

    async fn move_record(
        &self,
        id: &str,
        from: Partition,
        to: Partition,
        at: DateTime<Utc>,
    ) -> Result<MoveOutcome> {
        self.check_writable(id)?;
        let mut inner = self.inner.write().await;

        let Some(record) = inner.get_mut(from).remove(id) else {
            return Ok(MoveOutcome::Missing);
        };

        if inner.get(to).contains_key(id) {
            debug!("{} already present in {} partition, keeping existing copy", id, to);
            return Ok(MoveOutcome::AlreadyPresent);
        }

        let record = if to == Partition::History {
            record.into_archived(at)
        } else {
            record
        };
        inner.get_mut(to).insert(id.to_string(), record);
        Ok(MoveOutcome::Moved)
    }

    async fn delete(&self, partition: Partition, id: &str) -> Result<bool> {
        self.check_writable(id)?;
        Ok(self.inner.write().await.get_mut(partition).remove(id).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Lease lock shared between electors living in the same process
#[derive(Clone)]
pub struct MemoryLeaseBackend {
    leases: Arc<Mutex<HashMap<String, LeaseToken>>>,
    clock: Clock,
}

impl MemoryLeaseBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    /// Backend reading time from `clock` (tests drive expiry explicitly)
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LeaseToken>>> {
        self.leases
            .lock()
            .map_err(|_| LivescoreError::Internal("lease table mutex poisoned".to_string()))
    }
}

impl Default for MemoryLeaseBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseBackend for MemoryLeaseBackend {
    async fn acquire_or_renew(
        &self,
        resource: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<LeaseToken>> {
        let now = (self.clock)();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| LivescoreError::Validation(format!("lease duration: {e}")))?;
        let mut leases = self.lock()?;

        let acquired_at = match leases.get(resource) {
            Some(current) if current.is_valid_at(now) && !current.is_owned_by(owner) => {
                return Ok(None);
            }
            Some(current) if current.is_valid_at(now) => current.acquired_at,
            _ => now,
        };

        let token = LeaseToken {
            resource: resource.to_string(),
            owner: owner.to_string(),
            acquired_at,
            expires_at: now + lease,
        };
        leases.insert(resource.to_string(), token.clone());
        Ok(Some(token))
    }

    async fn release(&self, resource: &str, owner: &str) -> Result<bool> {
        let mut leases = self.lock()?;
        match leases.get(resource) {
            Some(current) if current.is_owned_by(owner) => {
                leases.remove(resource);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_is_exclusive() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .upsert(Partition::Active, &EventRecord::new("a", now))
            .await
            .unwrap();

        let outcome = store
            .move_record("a", Partition::Active, Partition::History, now)
            .await
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);
        assert!(store.get(Partition::Active, "a").await.unwrap().is_none());

        let archived = store.get(Partition::History, "a").await.unwrap().unwrap();
        assert_eq!(archived.status, EventStatus::Archived);
        assert_eq!(archived.archived_at, Some(now));

        let again = store
            .move_record("a", Partition::Active, Partition::History, now)
            .await
            .unwrap();
        assert_eq!(again, MoveOutcome::Missing);
    }

    #[tokio::test]
    async fn test_archive_keeps_first_copy() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store
            .upsert(Partition::Active, &EventRecord::new("a", t0))
            .await
            .unwrap();
        store
            .move_record("a", Partition::Active, Partition::History, t0)
            .await
            .unwrap();

        let t1 = t0 + chrono::Duration::minutes(30);
        store
            .upsert(Partition::Active, &EventRecord::new("a", t1))
            .await
            .unwrap();
        let outcome = store
            .move_record("a", Partition::Active, Partition::History, t1)
            .await
            .unwrap();

        assert_eq!(outcome, MoveOutcome::AlreadyPresent);
        assert_eq!(store.len(Partition::Active).await, 0);
        let kept = store.get(Partition::History, "a").await.unwrap().unwrap();
        assert_eq!(kept.archived_at, Some(t0));
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryStore::new();
        store.fail_writes_for("x");
        let err = store
            .upsert(Partition::Active, &EventRecord::new("x", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, LivescoreError::StoreWrite { ref id, .. } if id == "x"));

        store.heal("x");
        assert!(store
            .upsert(Partition::Active, &EventRecord::new("x", Utc::now()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_lease_expiry_hands_over() {
        let now = Arc::new(Mutex::new(Utc::now()));
        let clock_now = now.clone();
        let backend = MemoryLeaseBackend::with_clock(Arc::new(move || *clock_now.lock().unwrap()));
        let lease = Duration::from_secs(30);

        let first = backend.acquire_or_renew("poller", "a", lease).await.unwrap();
        assert!(first.is_some());
        assert!(backend.acquire_or_renew("poller", "b", lease).await.unwrap().is_none());

        *now.lock().unwrap() += chrono::Duration::seconds(31);
        let taken = backend.acquire_or_renew("poller", "b", lease).await.unwrap();
        assert_eq!(taken.map(|t| t.owner), Some("b".to_string()));

        assert!(!backend.release("poller", "a").await.unwrap());
        assert!(backend.release("poller", "b").await.unwrap());
    }
}
