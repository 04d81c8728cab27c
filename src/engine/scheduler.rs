//! Cycle driver
//!
//! One cycle: list live events → reconcile → fetch details → apply → commit
//! → archival pass → stall scan → alerts. Cycles only run while this process
//! holds a valid lease, never overlap, and a failed cycle never stops the
//! next one.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::lifecycle::{
    ApplyReport, ArchiveReport, CommitReport, LifecycleEngine, LifecyclePolicy, ReconcileReport,
};
use super::worker_pool::WorkerPool;
use crate::adapters::{FeedClient, Partition, Store};
use crate::config::AppConfig;
use crate::coordination::{Leadership, ShutdownToken};
use crate::domain::EventStatus;
use crate::error::{LivescoreError, Result};
use crate::services::Metrics;
use crate::supervisor::{AlertManager, StallAlert, StallMonitor};

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub live: usize,
    pub reconcile: ReconcileReport,
    pub apply: ApplyReport,
    pub commit: CommitReport,
    pub archive: ArchiveReport,
    pub alerts: usize,
}

pub struct Scheduler {
    feed: Arc<dyn FeedClient>,
    store: Arc<dyn Store>,
    engine: LifecycleEngine,
    pool: WorkerPool,
    monitor: StallMonitor,
    alerts: AlertManager,
    metrics: Arc<Metrics>,
    interval: Duration,
    list_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        store: Arc<dyn Store>,
        config: &AppConfig,
        alerts: AlertManager,
        metrics: Arc<Metrics>,
    ) -> Self {
        let engine = LifecycleEngine::new(store.clone(), LifecyclePolicy::from(&config.lifecycle))
            .with_tournament_filter(config.feed.tournament_filter.clone());

        Self {
            pool: WorkerPool::new(feed.clone(), &config.pool),
            feed,
            store,
            engine,
            monitor: StallMonitor::from_config(&config.monitor),
            alerts,
            metrics,
            interval: Duration::from_secs(config.scheduler.cycle_interval_secs),
            list_timeout: Duration::from_millis(config.feed.request_timeout_ms),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single cycle as of `now`.
    ///
    /// Fails without touching the store when the live list cannot be read.
    /// Per-record failures after that point are contained and reported.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let summaries = match tokio::time::timeout(self.list_timeout, self.feed.list_live()).await
        {
            Ok(Ok(summaries)) => summaries,
            Ok(Err(LivescoreError::FeedUnavailable(reason))) => {
                return Err(LivescoreError::FeedUnavailable(reason))
            }
            Ok(Err(e)) => return Err(LivescoreError::FeedUnavailable(e.to_string())),
            Err(_) => {
                return Err(LivescoreError::FeedUnavailable(format!(
                    "live list timed out after {:?}",
                    self.list_timeout
                )))
            }
        };

        let mut plan = self.engine.reconcile(&summaries, now).await?;
        let results = self.pool.submit(plan.refresh_ids()).await;
        let apply = self.engine.apply(&mut plan, results);
        let commit = self.engine.commit(&plan).await;

        let archive = match self.engine.archive_pass(now).await {
            Ok(report) => report,
            Err(e) => {
                error!("Archival pass failed, retrying next cycle: {}", e);
                ArchiveReport::default()
            }
        };

        let alerts = self.scan_for_stalls(now).await;

        let report = CycleReport {
            started_at: now,
            finished_at: Utc::now(),
            live: summaries.len(),
            reconcile: plan.report.clone(),
            apply,
            commit,
            archive,
            alerts,
        };
        self.metrics.record_cycle(&report);

        info!(
            live = report.live,
            created = report.reconcile.created,
            quarantined = report.reconcile.quarantined,
            archived = report.archive.archived.len(),
            fetch_failed = report.apply.fetch_failures + report.apply.fetch_timeouts,
            write_failed = report.commit.failed.len(),
            alerts = report.alerts,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Scan Active records, admit what the rate limit allows, stamp
    /// `last_alert_sent_at` on those, then dispatch.
    ///
    /// Alerts held by the rate limit stay unstamped and come back next scan.
    /// An admitted alert whose stamp cannot be persisted is held back so a
    /// flapping store cannot cause an alert storm.
    async fn scan_for_stalls(&self, now: DateTime<Utc>) -> usize {
        let active = match self
            .store
            .query_by_status(Partition::Active, EventStatus::Active)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!("Stall scan skipped, could not read active events: {}", e);
                return 0;
            }
        };

        let stalled = self.monitor.scan(&active, now);
        if stalled.is_empty() {
            return 0;
        }

        let admitted = self.alerts.admit(stalled).await;
        let mut to_send: Vec<StallAlert> = Vec::with_capacity(admitted.len());
        for alert in admitted {
            let Some(record) = active.iter().find(|r| r.id == alert.id) else {
                continue;
            };
            let mut record = record.clone();
            record.last_alert_sent_at = Some(now);
            match self.store.upsert(Partition::Active, &record).await {
                Ok(()) => to_send.push(alert),
                Err(e) => warn!(id = %alert.id, "Holding stall alert, stamp not saved: {}", e),
            }
        }

        let count = to_send.len();
        // Fire and forget; delivery failures are logged by the alert manager
        drop(self.alerts.dispatch(to_send).await);
        count
    }

    fn holds_lease(leadership: &watch::Receiver<Option<Leadership>>) -> bool {
        leadership.borrow().as_ref().is_some_and(Leadership::is_valid)
    }

    /// Resolves true once a valid lease is published, false if the
    /// publisher has gone away.
    async fn wait_for_lease(leadership: &mut watch::Receiver<Option<Leadership>>) -> bool {
        loop {
            if Self::holds_lease(leadership) {
                return true;
            }
            if leadership.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Run cycles whenever `leadership` holds a valid lease until shutdown.
    ///
    /// Standby processes sit in the outer wait. A leader ticks every
    /// `interval`; losing the lease stops scheduling after the in-flight
    /// cycle completes.
    pub async fn run(
        &self,
        mut leadership: watch::Receiver<Option<Leadership>>,
        mut shutdown: ShutdownToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                held = Self::wait_for_lease(&mut leadership) => {
                    if !held {
                        warn!("Leadership channel closed, scheduler stopping");
                        break;
                    }
                }
            }

            info!("Leader: running cycles every {:?}", self.interval);
            self.metrics.set_leader(true);

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let stop = loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break true,
                    changed = leadership.changed() => {
                        if changed.is_err() {
                            break true;
                        }
                        if !Self::holds_lease(&leadership) {
                            break false;
                        }
                    }
                    _ = ticker.tick() => {
                        if !Self::holds_lease(&leadership) {
                            break false;
                        }
                        // Runs to completion even if shutdown or lease loss arrives meanwhile
                        match self.run_cycle(Utc::now()).await {
                            Ok(report) => debug!(
                                "Cycle took {}ms",
                                (report.finished_at - report.started_at).num_milliseconds()
                            ),
                            Err(e) => {
                                self.metrics.inc_cycles_failed();
                                error!("Cycle failed: {}", e);
                            }
                        }
                    }
                }
            };

            self.metrics.set_leader(false);
            if stop {
                break;
            }
            warn!("Leadership lost, cycles paused until reacquired");
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::coordination::{publish_leadership, GracefulShutdown, ShutdownSignal};
    use crate::domain::{EventSummary, LeaseToken};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingFeed {
        lists: AtomicUsize,
    }

    #[async_trait]
    impl FeedClient for CountingFeed {
        async fn list_live(&self) -> Result<Vec<EventSummary>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            Ok(vec![EventSummary::new("1")])
        }

        async fn fetch_detail(&self, _id: &str) -> Result<Value> {
            Ok(json!({}))
        }
    }

    /// Feed whose live list parks until the test lets it go
    #[derive(Default)]
    struct GatedFeed {
        lists: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FeedClient for GatedFeed {
        async fn list_live(&self) -> Result<Vec<EventSummary>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![EventSummary::new("7")])
        }

        async fn fetch_detail(&self, _id: &str) -> Result<Value> {
            Ok(json!({}))
        }
    }

    fn lease(valid_for: Duration) -> Leadership {
        let now = Utc::now();
        let token = LeaseToken {
            resource: "poller".to_string(),
            owner: "me".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(valid_for).unwrap(),
        };
        Leadership::for_duration(token, valid_for)
    }

    fn scheduler_with(feed: Arc<dyn FeedClient>, store: Arc<dyn Store>) -> Scheduler {
        let mut config = AppConfig::default_config("http://sidecar");
        config.scheduler.cycle_interval_secs = 1;
        Scheduler::new(
            feed,
            store,
            &config,
            AlertManager::with_defaults(),
            Arc::new(Metrics::new()),
        )
    }

    fn scheduler(feed: Arc<CountingFeed>) -> Scheduler {
        scheduler_with(feed, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_standby_runs_no_cycles() {
        let feed = Arc::new(CountingFeed::default());
        let scheduler = scheduler(feed.clone());
        let shutdown = GracefulShutdown::with_defaults();
        let (_tx, rx) = watch::channel(None);

        let run = scheduler.run(rx, shutdown.token());
        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.request_shutdown(ShutdownSignal::Graceful);
        };
        tokio::join!(run, stop);

        assert_eq!(feed.lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_leader_cycles_until_lease_lost() {
        let feed = Arc::new(CountingFeed::default());
        let scheduler = scheduler(feed.clone());
        let shutdown = GracefulShutdown::with_defaults();
        let (tx, rx) = watch::channel(Some(lease(Duration::from_secs(300))));

        let run = scheduler.run(rx, shutdown.token());
        let drive = async {
            // First tick fires immediately
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send_replace(None);
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            shutdown.request_shutdown(ShutdownSignal::Graceful);
        };
        tokio::join!(run, drive);

        assert_eq!(feed.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_not_leadership() {
        let feed = Arc::new(CountingFeed::default());
        let scheduler = scheduler(feed.clone());
        let shutdown = GracefulShutdown::with_defaults();
        let (_tx, rx) = watch::channel(Some(lease(Duration::ZERO)));

        let run = scheduler.run(rx, shutdown.token());
        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.request_shutdown(ShutdownSignal::Graceful);
        };
        tokio::join!(run, stop);

        assert_eq!(feed.lists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_resume_after_late_renewal() {
        let feed = Arc::new(CountingFeed::default());
        let scheduler = scheduler(feed.clone());
        let shutdown = GracefulShutdown::with_defaults();
        let (tx, rx) = watch::channel(Some(lease(Duration::from_millis(1_500))));

        let run = scheduler.run(rx, shutdown.token());
        let drive = async {
            // Ticks at 0s and 1s run; the 2s tick finds the deadline passed
            tokio::time::sleep(Duration::from_millis(3_000)).await;
            let before = feed.lists.load(Ordering::SeqCst);

            // Renewal lands while the process is still the lease holder
            publish_leadership(&tx, Some(lease(Duration::from_secs(300))));
            tokio::time::sleep(Duration::from_millis(3_500)).await;
            shutdown.request_shutdown(ShutdownSignal::Graceful);
            before
        };
        let ((), before) = tokio::join!(run, drive);

        assert_eq!(before, 2);
        assert!(feed.lists.load(Ordering::SeqCst) >= before + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_lost_mid_cycle_lets_the_cycle_finish() {
        let feed = Arc::new(GatedFeed::default());
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(feed.clone(), store.clone());
        let shutdown = GracefulShutdown::with_defaults();
        let (tx, rx) = watch::channel(Some(lease(Duration::from_secs(300))));

        let run = scheduler.run(rx, shutdown.token());
        let drive = async {
            feed.entered.notified().await;
            publish_leadership(&tx, None);
            feed.release.notify_one();

            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.request_shutdown(ShutdownSignal::Graceful);
        };
        tokio::join!(run, drive);

        // The in-flight cycle committed its writes and no further cycle started
        assert!(store.get(Partition::Active, "7").await.unwrap().is_some());
        assert_eq!(feed.lists.load(Ordering::SeqCst), 1);
    }
}
