//! Capabilities the engine depends on
//!
//! The feed, the document store and the alert channel are external
//! collaborators. The engine only sees these traits, so tests can drive a
//! full cycle with in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{EventRecord, EventStatus, EventSummary};
use crate::error::Result;
use crate::supervisor::StallAlert;

/// Source of live events
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Every event currently reported live
    async fn list_live(&self) -> Result<Vec<EventSummary>>;

    /// Raw detail snapshot for one event
    async fn fetch_detail(&self, id: &str) -> Result<Value>;
}

/// Store partitions: live records and the append-only archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Active,
    History,
}

impl Partition {
    pub fn table(&self) -> &'static str {
        match self {
            Partition::Active => "events_active",
            Partition::History => "events_history",
        }
    }

    /// Statuses a record can carry while it sits in this partition
    pub fn statuses(&self) -> &'static [EventStatus] {
        match self {
            Partition::Active => &[EventStatus::Active, EventStatus::Quarantined],
            Partition::History => &[EventStatus::Archived],
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Active => write!(f, "active"),
            Partition::History => write!(f, "history"),
        }
    }
}

/// Result of moving a record between partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Copied to the target and removed from the source
    Moved,
    /// Target already held the id; the existing copy was kept and the source removed
    AlreadyPresent,
    /// Nothing to move
    Missing,
}

/// Document store keyed by event id
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert(&self, partition: Partition, record: &EventRecord) -> Result<()>;

    async fn get(&self, partition: Partition, id: &str) -> Result<Option<EventRecord>>;

    /// Every record in a partition
    async fn query_all(&self, partition: Partition) -> Result<Vec<EventRecord>>;

    async fn query_by_status(
        &self,
        partition: Partition,
        status: EventStatus,
    ) -> Result<Vec<EventRecord>>;

    /// Records whose `last_seen_at` is strictly before `before`
    async fn query_stale_before(
        &self,
        partition: Partition,
        before: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>>;

    /// Atomically move a record. Moving into `History` stamps it Archived at `at`.
    async fn move_record(
        &self,
        id: &str,
        from: Partition,
        to: Partition,
        at: DateTime<Utc>,
    ) -> Result<MoveOutcome>;

    async fn delete(&self, partition: Partition, id: &str) -> Result<bool>;

    /// Connectivity check used at startup
    async fn ping(&self) -> Result<()>;
}

/// Outbound alert channel. Best effort: callers log failures and move on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_alert(&self, alert: &StallAlert) -> Result<()>;
}
