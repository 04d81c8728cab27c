//! Alert Manager
//!
//! Dispatches stall alerts to the configured notifier without blocking the
//! cycle. Delivery is best effort: failures are logged and counted, never
//! retried. A global per-minute cap protects the chat from alert storms when
//! the whole feed freezes at once; alerts over the cap are not admitted and
//! stay pending for a later scan.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::stall_monitor::StallAlert;
use crate::adapters::Notifier;
use crate::config::MonitorConfig;
use crate::services::Metrics;

/// Configuration for alert manager
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    /// Maximum alerts per minute before throttling (default: 20)
    pub max_alerts_per_minute: u32,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            max_alerts_per_minute: 20,
        }
    }
}

impl From<&MonitorConfig> for AlertManagerConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            max_alerts_per_minute: config.max_alerts_per_minute,
        }
    }
}

pub struct AlertManager {
    config: AlertManagerConfig,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Option<Arc<Metrics>>,
    sent_this_minute: Mutex<Vec<DateTime<Utc>>>,
}

impl AlertManager {
    pub fn new(config: AlertManagerConfig) -> Self {
        Self {
            config,
            notifier: None,
            metrics: None,
            sent_this_minute: Mutex::new(Vec::new()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(AlertManagerConfig::default())
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Check global rate limit (alerts per minute)
    async fn is_throttled(&self, now: DateTime<Utc>) -> bool {
        let minute_ago = now - chrono::Duration::minutes(1);
        let mut sent = self.sent_this_minute.lock().await;
        sent.retain(|t| *t > minute_ago);

        if sent.len() >= self.config.max_alerts_per_minute as usize {
            return true;
        }
        sent.push(now);
        false
    }

    /// Keep the alerts the per-minute cap allows and count them against it.
    ///
    /// Without a notifier there is nothing to flood, so everything is admitted.
    pub async fn admit(&self, alerts: Vec<StallAlert>) -> Vec<StallAlert> {
        if self.notifier.is_none() {
            return alerts;
        }

        let mut admitted = Vec::with_capacity(alerts.len());
        for alert in alerts {
            if self.is_throttled(alert.detected_at).await {
                warn!(
                    id = %alert.id,
                    "Alert throttled (max {} per minute), retrying next scan",
                    self.config.max_alerts_per_minute
                );
                continue;
            }
            admitted.push(alert);
        }
        admitted
    }

    /// Fire-and-forget delivery of admitted alerts.
    ///
    /// Returns the spawned send tasks so callers (and tests) may await them;
    /// the scheduler drops them.
    pub async fn dispatch(&self, alerts: Vec<StallAlert>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(alerts.len());

        for alert in alerts {
            warn!(
                id = %alert.id,
                stalled_min = alert.stalled_for().num_minutes(),
                "Score stalled"
            );

            let Some(notifier) = self.notifier.clone() else {
                continue;
            };

            let metrics = self.metrics.clone();
            handles.push(tokio::spawn(async move {
                match notifier.send_alert(&alert).await {
                    Ok(()) => {
                        debug!(id = %alert.id, "Stall alert delivered");
                        if let Some(m) = metrics {
                            m.inc_alerts_sent();
                        }
                    }
                    Err(e) => {
                        error!(id = %alert.id, "Failed to deliver stall alert: {}", e);
                        if let Some(m) = metrics {
                            m.inc_alerts_failed();
                        }
                    }
                }
            }));
        }

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::traits::MockNotifier;
    use crate::error::LivescoreError;

    fn alert(id: &str) -> StallAlert {
        let now = Utc::now();
        StallAlert {
            id: id.to_string(),
            since: now - chrono::Duration::minutes(6),
            detected_at: now,
            tournament: None,
            matchup: None,
            score: None,
        }
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_stop_others() {
        let mut notifier = MockNotifier::new();
        notifier.expect_send_alert().times(2).returning(|a| {
            if a.id == "bad" {
                Err(LivescoreError::Notification("HTTP 429".to_string()))
            } else {
                Ok(())
            }
        });

        let metrics = Arc::new(Metrics::new());
        let manager = AlertManager::with_defaults()
            .with_notifier(Arc::new(notifier))
            .with_metrics(metrics.clone());

        let handles = manager.dispatch(vec![alert("bad"), alert("good")]).await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(metrics.snapshot().alerts_sent, 1);
        assert_eq!(metrics.snapshot().alerts_failed, 1);
    }

    #[tokio::test]
    async fn test_throttle_caps_admission() {
        let mut notifier = MockNotifier::new();
        notifier.expect_send_alert().times(2).returning(|_| Ok(()));

        let manager = AlertManager::new(AlertManagerConfig {
            max_alerts_per_minute: 2,
        })
        .with_notifier(Arc::new(notifier));

        let admitted = manager
            .admit(vec![alert("a"), alert("b"), alert("c")])
            .await;
        let ids: Vec<&str> = admitted.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        // A minute later the held alert gets through
        let mut late = alert("c");
        late.detected_at += chrono::Duration::seconds(61);
        assert_eq!(manager.admit(vec![late]).await.len(), 1);

        for handle in manager.dispatch(admitted).await {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_without_notifier_alerts_are_only_logged() {
        let manager = AlertManager::new(AlertManagerConfig {
            max_alerts_per_minute: 1,
        });

        let admitted = manager.admit(vec![alert("a"), alert("b")]).await;
        assert_eq!(admitted.len(), 2);
        assert!(manager.dispatch(admitted).await.is_empty());
    }
}
