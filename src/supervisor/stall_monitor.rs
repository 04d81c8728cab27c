//! Stall detection for live events
//!
//! A live event whose score has not moved for `stall_threshold` usually means
//! the upstream page froze or the match was suspended without the feed
//! noticing. The monitor is a pure scan; de-duplication state lives on the
//! record itself (`last_alert_sent_at`).

use chrono::{DateTime, Duration, Utc};

use crate::config::MonitorConfig;
use crate::domain::{EventRecord, EventStatus};

/// One stalled event, ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct StallAlert {
    pub id: String,
    /// Last time the score changed
    pub since: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub tournament: Option<String>,
    pub matchup: Option<String>,
    pub score: Option<String>,
}

impl StallAlert {
    pub fn stalled_for(&self) -> Duration {
        self.detected_at - self.since
    }

    /// Markdown message for chat notifiers
    pub fn format_message(&self) -> String {
        let mut lines = vec![format!(
            "\u{26a0}\u{fe0f} *Score stalled* for {} min",
            self.stalled_for().num_minutes()
        )];
        if let Some(tournament) = &self.tournament {
            lines.push(format!("*Tournament:* {}", tournament));
        }
        if let Some(matchup) = &self.matchup {
            lines.push(format!("*Match:* {}", matchup));
        }
        if let Some(score) = &self.score {
            lines.push(format!("*Score:* {}", score));
        }
        lines.push(format!("*Event:* `{}`", self.id));
        lines.push(format!(
            "*Last change:* {}",
            self.since.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct StallMonitor {
    threshold: Duration,
}

impl StallMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self::new(Duration::seconds(cfg.stall_threshold_secs as i64))
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Alerts for every Active record stalled at `now`.
    ///
    /// Completed events are skipped, and an id alerts at most once per
    /// threshold window.
    pub fn scan(&self, records: &[EventRecord], now: DateTime<Utc>) -> Vec<StallAlert> {
        records
            .iter()
            .filter(|r| r.status == EventStatus::Active)
            .filter(|r| !r.detail.as_ref().is_some_and(|d| d.is_completed()))
            .filter(|r| now - r.last_score_change_at >= self.threshold)
            .filter(|r| match r.last_alert_sent_at {
                Some(sent) => now - sent >= self.threshold,
                None => true,
            })
            .map(|r| StallAlert {
                id: r.id.clone(),
                since: r.last_score_change_at,
                detected_at: now,
                tournament: r.detail.as_ref().and_then(|d| d.tournament.clone()),
                matchup: r
                    .detail
                    .as_ref()
                    .filter(|d| !d.players.is_empty())
                    .map(|d| d.matchup()),
                score: r.detail.as_ref().map(|d| d.score.display()),
            })
            .collect()
    }
}
