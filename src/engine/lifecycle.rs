//! Event lifecycle: Active → Quarantined → Archived
//!
//! Status is driven only by presence in the feed summary. An event missing
//! from one summary is quarantined rather than archived, so a single dropped
//! feed cycle never loses data; it is archived once the quarantine period
//! runs out. A staleness ceiling archives anything unseen for too long even
//! if cycles were skipped.
//!
//! [`transition`] is the pure rule table. [`LifecycleEngine`] runs it against
//! the store once per cycle in three steps: `reconcile` (in memory), `apply`
//! (fetched details), then `commit` (per-record upserts), followed by the
//! independent `archive_pass`.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::adapters::{MoveOutcome, Partition, Store};
use crate::config::LifecycleConfig;
use crate::domain::{map_detail, EventRecord, EventStatus, EventSummary};
use crate::error::{LivescoreError, Result};

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub quarantine_period: Duration,
    pub staleness_ceiling: Duration,
    pub archive_completed: bool,
}

impl From<&LifecycleConfig> for LifecyclePolicy {
    fn from(cfg: &LifecycleConfig) -> Self {
        Self {
            quarantine_period: Duration::seconds(cfg.quarantine_period_secs as i64),
            staleness_ceiling: Duration::seconds(cfg.staleness_ceiling_secs as i64),
            archive_completed: cfg.archive_completed,
        }
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveReason {
    /// Quarantined for the full grace period without reappearing
    QuarantineExpired,
    /// Not seen in the feed for longer than the staleness ceiling
    Stale,
    /// Detail reports the event as finished
    Completed,
}

impl std::fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveReason::QuarantineExpired => write!(f, "quarantine_expired"),
            ArchiveReason::Stale => write!(f, "stale"),
            ArchiveReason::Completed => write!(f, "completed"),
        }
    }
}

/// Outcome of evaluating one record against one feed summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// New id: create an Active record
    Create,
    /// Quarantined id is back: Active again, grace cleared
    Reactivate,
    /// Active id still present: bump presence, refresh detail
    Refresh,
    /// Active id missing: start the grace period
    Quarantine,
    /// Quarantined id still missing, grace not over
    Hold,
    Archive(ArchiveReason),
    /// Nothing to do
    Unchanged,
}

/// Pure rule table for a single id.
///
/// `record` is the current active-partition record (if any) and `present`
/// says whether the id is in the latest feed summary.
pub fn transition(
    record: Option<&EventRecord>,
    present: bool,
    now: DateTime<Utc>,
    policy: &LifecyclePolicy,
) -> Transition {
    let Some(record) = record else {
        return if present {
            Transition::Create
        } else {
            Transition::Unchanged
        };
    };

    match (record.status, present) {
        (EventStatus::Quarantined, true) => Transition::Reactivate,
        (EventStatus::Active, true) => Transition::Refresh,
        (EventStatus::Active, false) => Transition::Quarantine,
        (EventStatus::Quarantined, false) => match record.quarantined_since {
            Some(since) if now - since >= policy.quarantine_period => {
                Transition::Archive(ArchiveReason::QuarantineExpired)
            }
            Some(_) => Transition::Hold,
            // Quarantined without a timestamp: restart the grace period
            None => Transition::Quarantine,
        },
        (EventStatus::Archived, _) => Transition::Unchanged,
    }
}

/// Why, if at all, the archival pass should remove this record.
///
/// Staleness is checked first since it applies regardless of status.
pub fn archive_reason(
    record: &EventRecord,
    now: DateTime<Utc>,
    policy: &LifecyclePolicy,
) -> Option<ArchiveReason> {
    if record.status == EventStatus::Archived {
        return None;
    }
    if now - record.last_seen_at > policy.staleness_ceiling {
        return Some(ArchiveReason::Stale);
    }
    if record.status == EventStatus::Quarantined {
        if let Some(since) = record.quarantined_since {
            if now - since >= policy.quarantine_period {
                return Some(ArchiveReason::QuarantineExpired);
            }
        }
    }
    if policy.archive_completed && record.detail.as_ref().is_some_and(|d| d.is_completed()) {
        return Some(ArchiveReason::Completed);
    }
    None
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub reactivated: usize,
    pub refreshed: usize,
    pub quarantined: usize,
    pub held: usize,
    /// Summaries dropped by the tournament filter
    pub filtered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub updated: usize,
    pub score_changes: usize,
    pub fetch_failures: usize,
    pub fetch_timeouts: usize,
    pub unmapped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub written: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub archived: Vec<(String, ArchiveReason)>,
    /// Ids whose history copy already existed; active copy removed anyway
    pub duplicates: usize,
    pub failed: Vec<String>,
}

/// Working set for one cycle, built by `reconcile` and consumed by `commit`
#[derive(Debug, Default)]
pub struct CyclePlan {
    pub now: DateTime<Utc>,
    records: HashMap<String, EventRecord>,
    summaries: HashMap<String, EventSummary>,
    refresh: Vec<String>,
    dirty: HashSet<String>,
    pub report: ReconcileReport,
}

impl CyclePlan {
    /// Ids whose detail should be fetched this cycle
    pub fn refresh_ids(&self) -> &[String] {
        &self.refresh
    }
}

pub struct LifecycleEngine {
    store: Arc<dyn Store>,
    policy: LifecyclePolicy,
    tournament_filter: Option<String>,
}

impl LifecycleEngine {
    pub fn new(store: Arc<dyn Store>, policy: LifecyclePolicy) -> Self {
        Self {
            store,
            policy,
            tournament_filter: None,
        }
    }

    /// Ignore summaries whose tournament does not contain `filter`
    pub fn with_tournament_filter(mut self, filter: Option<String>) -> Self {
        self.tournament_filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Apply the presence rules (create, reactivate, refresh, quarantine) in
    /// memory. Nothing is written until [`LifecycleEngine::commit`].
    pub async fn reconcile(&self, summaries: &[EventSummary], now: DateTime<Utc>) -> Result<CyclePlan> {
        let mut plan = CyclePlan {
            now,
            ..CyclePlan::default()
        };

        for summary in summaries {
            if let Some(filter) = &self.tournament_filter {
                if !summary.matches_tournament(filter) {
                    plan.report.filtered += 1;
                    continue;
                }
            }
            plan.summaries.insert(summary.id.clone(), summary.clone());
        }

        let existing = self.store.query_all(Partition::Active).await?;
        plan.records = existing.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut present: Vec<String> = plan.summaries.keys().cloned().collect();
        present.sort();

        for id in present {
            match transition(plan.records.get(&id), true, now, &self.policy) {
                Transition::Create => {
                    info!(id = %id, "New live event");
                    plan.records.insert(id.clone(), EventRecord::new(id.clone(), now));
                    plan.report.created += 1;
                }
                Transition::Reactivate => {
                    if let Some(record) = plan.records.get_mut(&id) {
                        info!(id = %id, "Event reappeared, leaving quarantine");
                        record.mark_seen(now);
                        plan.report.reactivated += 1;
                    }
                }
                Transition::Refresh => {
                    if let Some(record) = plan.records.get_mut(&id) {
                        record.mark_seen(now);
                        plan.report.refreshed += 1;
                    }
                }
                other => {
                    warn!(id = %id, "Unexpected transition {:?} for present event", other);
                    continue;
                }
            }
            plan.dirty.insert(id.clone());
            plan.refresh.push(id);
        }

        let mut absent: Vec<String> = plan
            .records
            .keys()
            .filter(|id| !plan.summaries.contains_key(*id))
            .cloned()
            .collect();
        absent.sort();

        for id in absent {
            let Some(record) = plan.records.get_mut(&id) else {
                continue;
            };
            match transition(Some(record), false, now, &self.policy) {
                Transition::Quarantine => {
                    info!(id = %id, "Event missing from feed, quarantined");
                    record.mark_quarantined(now);
                    plan.dirty.insert(id);
                    plan.report.quarantined += 1;
                }
                Transition::Hold => plan.report.held += 1,
                Transition::Archive(reason) => {
                    // Moved to history by archive_pass, not by reconcile
                    debug!(id = %id, %reason, "Left for the archival pass");
                }
                _ => {}
            }
        }

        Ok(plan)
    }

    /// Fold fetched details into the plan.
    ///
    /// Failed or unmappable fetches leave the stored detail untouched and
    /// never affect status.
    pub fn apply(&self, plan: &mut CyclePlan, results: HashMap<String, Result<Value>>) -> ApplyReport {
        let mut report = ApplyReport::default();
        let now = plan.now;

        for (id, result) in results {
            let raw = match result {
                Ok(raw) => raw,
                Err(LivescoreError::FetchTimeout { .. }) => {
                    report.fetch_timeouts += 1;
                    continue;
                }
                Err(_) => {
                    report.fetch_failures += 1;
                    continue;
                }
            };

            let (Some(summary), Some(record)) = (plan.summaries.get(&id), plan.records.get_mut(&id))
            else {
                debug!(id = %id, "Detail for an id outside this cycle, ignoring");
                continue;
            };

            match map_detail(summary, &raw) {
                Some(detail) => {
                    if record.apply_detail(detail, now) {
                        debug!(id = %id, "Score changed");
                        report.score_changes += 1;
                    }
                    plan.dirty.insert(id);
                    report.updated += 1;
                }
                None => {
                    warn!(id = %id, "Detail payload could not be mapped, keeping previous detail");
                    report.unmapped += 1;
                }
            }
        }

        report
    }

    /// Write every changed record. A failed write is logged and retried
    /// naturally next cycle; it never stops the remaining writes.
    pub async fn commit(&self, plan: &CyclePlan) -> CommitReport {
        let mut report = CommitReport::default();
        let mut ids: Vec<&String> = plan.dirty.iter().collect();
        ids.sort();

        for id in ids {
            let Some(record) = plan.records.get(id) else {
                continue;
            };
            match self.store.upsert(Partition::Active, record).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    error!(id = %id, "Store write failed: {}", e);
                    report.failed.push(id.clone());
                }
            }
        }

        report
    }

    /// Independent archival sweep over the active partition: stale records,
    /// expired quarantines and (optionally) completed events move to history.
    pub async fn archive_pass(&self, now: DateTime<Utc>) -> Result<ArchiveReport> {
        let mut candidates: Vec<EventRecord> = self
            .store
            .query_stale_before(Partition::Active, now - self.policy.staleness_ceiling)
            .await?;
        candidates.extend(
            self.store
                .query_by_status(Partition::Active, EventStatus::Quarantined)
                .await?,
        );
        if self.policy.archive_completed {
            candidates.extend(
                self.store
                    .query_by_status(Partition::Active, EventStatus::Active)
                    .await?
                    .into_iter()
                    .filter(|r| r.detail.as_ref().is_some_and(|d| d.is_completed())),
            );
        }

        let mut report = ArchiveReport::default();
        let mut seen = HashSet::new();

        for record in candidates {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            let Some(reason) = archive_reason(&record, now, &self.policy) else {
                continue;
            };

            match self
                .store
                .move_record(&record.id, Partition::Active, Partition::History, now)
                .await
            {
                Ok(MoveOutcome::Moved) => {
                    info!(id = %record.id, %reason, "Event archived");
                    report.archived.push((record.id, reason));
                }
                Ok(MoveOutcome::AlreadyPresent) => {
                    info!(id = %record.id, %reason, "Event already archived, active copy removed");
                    report.duplicates += 1;
                    report.archived.push((record.id, reason));
                }
                Ok(MoveOutcome::Missing) => {
                    debug!(id = %record.id, "Record vanished before archival");
                }
                Err(e) => {
                    error!(id = %record.id, "Archival failed: {}", e);
                    report.failed.push(record.id);
                }
            }
        }

        Ok(report)
    }
}
