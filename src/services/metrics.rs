use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tracing::info;

use crate::engine::CycleReport;

/// Metrics collector for observability
pub struct Metrics {
    pub cycles_run: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub events_created: AtomicU64,
    pub events_reactivated: AtomicU64,
    pub events_quarantined: AtomicU64,
    pub events_archived: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub fetch_timeouts: AtomicU64,
    pub store_write_failures: AtomicU64,
    pub alerts_sent: AtomicU64,
    pub alerts_failed: AtomicU64,
    is_leader: AtomicBool,
    /// Unix millis of the last completed cycle, 0 before the first
    last_cycle_at: AtomicI64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub events_created: u64,
    pub events_reactivated: u64,
    pub events_quarantined: u64,
    pub events_archived: u64,
    pub fetch_failures: u64,
    pub fetch_timeouts: u64,
    pub store_write_failures: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub is_leader: bool,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_run: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            events_created: AtomicU64::new(0),
            events_reactivated: AtomicU64::new(0),
            events_quarantined: AtomicU64::new(0),
            events_archived: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            fetch_timeouts: AtomicU64::new(0),
            store_write_failures: AtomicU64::new(0),
            alerts_sent: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            is_leader: AtomicBool::new(false),
            last_cycle_at: AtomicI64::new(0),
        }
    }

    /// Fold a finished cycle into the counters
    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        let add = |counter: &AtomicU64, n: usize| {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        };
        add(&self.events_created, report.reconcile.created);
        add(&self.events_reactivated, report.reconcile.reactivated);
        add(&self.events_quarantined, report.reconcile.quarantined);
        add(&self.events_archived, report.archive.archived.len());
        add(&self.fetch_failures, report.apply.fetch_failures + report.apply.unmapped);
        add(&self.fetch_timeouts, report.apply.fetch_timeouts);
        add(
            &self.store_write_failures,
            report.commit.failed.len() + report.archive.failed.len(),
        );
        self.last_cycle_at
            .store(report.finished_at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn inc_cycles_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alerts_sent(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_alerts_failed(&self) {
        self.alerts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_leader(&self, leader: bool) {
        self.is_leader.store(leader, Ordering::Relaxed);
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    pub fn last_cycle_at(&self) -> Option<DateTime<Utc>> {
        match self.last_cycle_at.load(Ordering::Relaxed) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            cycles_run: get(&self.cycles_run),
            cycles_failed: get(&self.cycles_failed),
            events_created: get(&self.events_created),
            events_reactivated: get(&self.events_reactivated),
            events_quarantined: get(&self.events_quarantined),
            events_archived: get(&self.events_archived),
            fetch_failures: get(&self.fetch_failures),
            fetch_timeouts: get(&self.fetch_timeouts),
            store_write_failures: get(&self.store_write_failures),
            alerts_sent: get(&self.alerts_sent),
            alerts_failed: get(&self.alerts_failed),
            is_leader: self.is_leader(),
        }
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("cycles_total", "Orchestration cycles completed", s.cycles_run),
            ("cycles_failed_total", "Cycles aborted by an error", s.cycles_failed),
            ("events_created_total", "Events first seen in the feed", s.events_created),
            ("events_reactivated_total", "Events that left quarantine", s.events_reactivated),
            ("events_quarantined_total", "Events that entered quarantine", s.events_quarantined),
            ("events_archived_total", "Events moved to history", s.events_archived),
            ("fetch_failures_total", "Detail fetches that failed or did not map", s.fetch_failures),
            ("fetch_timeouts_total", "Detail fetches that timed out", s.fetch_timeouts),
            ("store_write_failures_total", "Per-record store writes that failed", s.store_write_failures),
            ("alerts_sent_total", "Stall alerts delivered", s.alerts_sent),
            ("alerts_failed_total", "Stall alerts that failed to deliver", s.alerts_failed),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP livescore_{name} {help}\n# TYPE livescore_{name} counter\nlivescore_{name} {value}\n\n"
            ));
        }
        out.push_str(&format!(
            "# HELP livescore_is_leader Whether this process holds the poller lease\n\
             # TYPE livescore_is_leader gauge\n\
             livescore_is_leader {}\n",
            u8::from(s.is_leader)
        ));
        if let Some(at) = self.last_cycle_at() {
            out.push_str(&format!(
                "\n# HELP livescore_last_cycle_timestamp_seconds Unix time of the last completed cycle\n\
                 # TYPE livescore_last_cycle_timestamp_seconds gauge\n\
                 livescore_last_cycle_timestamp_seconds {}\n",
                at.timestamp()
            ));
        }
        out
    }

    /// Log periodic status
    pub fn log_status(&self) {
        let s = self.snapshot();
        info!(
            leader = s.is_leader,
            cycles = s.cycles_run,
            failed = s.cycles_failed,
            archived = s.events_archived,
            alerts = s.alerts_sent,
            "Status"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_output() {
        let metrics = Metrics::new();
        metrics.inc_alerts_sent();
        metrics.set_leader(true);

        let text = metrics.prometheus();
        assert!(text.contains("livescore_alerts_sent_total 1"));
        assert!(text.contains("livescore_is_leader 1"));
        assert!(!text.contains("last_cycle_timestamp"));
    }

    #[test]
    fn test_last_cycle_unset() {
        assert!(Metrics::new().last_cycle_at().is_none());
    }
}
