//! Bounded fan-out of detail fetches
//!
//! At most `size` fetches run at once. Every task has its own timeout and its
//! own result slot, so one slow or failing id never holds up the others.

use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::adapters::FeedClient;
use crate::config::PoolConfig;
use crate::error::{LivescoreError, Result};

pub struct WorkerPool {
    feed: Arc<dyn FeedClient>,
    size: usize,
    task_timeout: Duration,
}

impl WorkerPool {
    pub fn new(feed: Arc<dyn FeedClient>, config: &PoolConfig) -> Self {
        Self::with_limits(
            feed,
            config.size,
            Duration::from_millis(config.task_timeout_ms),
        )
    }

    pub fn with_limits(feed: Arc<dyn FeedClient>, size: usize, task_timeout: Duration) -> Self {
        Self {
            feed,
            size: size.max(1),
            task_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Fetch every id and return one result per distinct id.
    ///
    /// Returns once all tasks have finished or timed out. A timed-out task is
    /// dropped and reported as [`LivescoreError::FetchTimeout`]; a panicking
    /// fetch is reported as [`LivescoreError::Internal`].
    pub async fn submit(&self, ids: &[String]) -> HashMap<String, Result<Value>> {
        let pending: HashSet<String> = ids.iter().cloned().collect();
        let mut results = HashMap::with_capacity(pending.len());
        if pending.is_empty() {
            return results;
        }

        let permits = Arc::new(Semaphore::new(self.size));
        let timeout_ms = self.task_timeout.as_millis() as u64;
        let mut tasks = JoinSet::new();

        for id in pending.iter().cloned() {
            let permits = permits.clone();
            let feed = self.feed.clone();
            let task_timeout = self.task_timeout;

            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let err = LivescoreError::Internal("worker pool closed".to_string());
                        return (id, Err(err));
                    }
                };

                // The timeout only starts once the task holds a permit
                let fetch = AssertUnwindSafe(feed.fetch_detail(&id)).catch_unwind();
                let result = match tokio::time::timeout(task_timeout, fetch).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => Err(LivescoreError::Internal(format!(
                        "detail fetch for {} panicked",
                        id
                    ))),
                    Err(_) => Err(LivescoreError::FetchTimeout {
                        id: id.clone(),
                        timeout_ms,
                    }),
                };
                (id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, result)) => {
                    if let Err(e) = &result {
                        warn!("{}", e);
                    }
                    results.insert(id, result);
                }
                Err(e) => error!("Worker task aborted: {}", e),
            }
        }

        // Every submitted id gets a slot, even if its task was torn down
        for id in pending {
            results.entry(id.clone()).or_insert_with(|| {
                Err(LivescoreError::Internal(format!(
                    "worker for {} did not report",
                    id
                )))
            });
        }

        let failed = results.values().filter(|r| r.is_err()).count();
        debug!(
            "Worker pool finished {} fetches ({} failed)",
            results.len(),
            failed
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventSummary;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Feed whose fetch behaviour is keyed by id prefix
    #[derive(Default)]
    struct ScriptedFeed {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl FeedClient for ScriptedFeed {
        async fn list_live(&self) -> Result<Vec<EventSummary>> {
            Ok(vec![])
        }

        async fn fetch_detail(&self, id: &str) -> Result<Value> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = if id.starts_with("slow") {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!({}))
            } else if id.starts_with("bad") {
                Err(LivescoreError::TransientFetch {
                    id: id.to_string(),
                    reason: "HTTP 502".to_string(),
                })
            } else if id.starts_with("boom") {
                panic!("decoder blew up");
            } else {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!({ "match": { "id": id } }))
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_per_id() {
        let pool = WorkerPool::with_limits(
            Arc::new(ScriptedFeed::default()),
            4,
            Duration::from_secs(5),
        );

        let results = pool.submit(&ids(&["ok-1", "slow-1", "bad-1", "ok-2"])).await;

        assert_eq!(results.len(), 4);
        assert!(results["ok-1"].is_ok());
        assert!(results["ok-2"].is_ok());
        assert!(matches!(
            results["slow-1"],
            Err(LivescoreError::FetchTimeout { timeout_ms: 5_000, .. })
        ));
        assert!(matches!(
            results["bad-1"],
            Err(LivescoreError::TransientFetch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let feed = Arc::new(ScriptedFeed::default());
        let pool = WorkerPool::with_limits(feed.clone(), 3, Duration::from_secs(5));

        let many: Vec<String> = (0..12).map(|i| format!("ok-{i}")).collect();
        let results = pool.submit(&many).await;

        assert_eq!(results.len(), 12);
        assert!(results.values().all(|r| r.is_ok()));
        assert!(feed.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_does_not_block_others() {
        let pool = WorkerPool::with_limits(
            Arc::new(ScriptedFeed::default()),
            2,
            Duration::from_secs(5),
        );

        let started = tokio::time::Instant::now();
        let results = pool.submit(&ids(&["slow-1", "ok-1", "ok-2", "ok-3"])).await;

        // One permit is pinned by the slow task for the full timeout; the
        // other serves the fast ids back to back.
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(results.values().filter(|r| r.is_ok()).count(), 3);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let pool = WorkerPool::with_limits(
            Arc::new(ScriptedFeed::default()),
            2,
            Duration::from_secs(5),
        );

        let results = pool.submit(&ids(&["boom-1", "bad-2"])).await;
        assert!(matches!(results["boom-1"], Err(LivescoreError::Internal(_))));
        assert!(results["bad-2"].is_err());
    }

    #[tokio::test]
    async fn test_duplicate_ids_collapse() {
        let pool = WorkerPool::with_limits(
            Arc::new(ScriptedFeed::default()),
            2,
            Duration::from_secs(5),
        );
        let results = pool.submit(&ids(&["bad-1", "bad-1"])).await;
        assert_eq!(results.len(), 1);
    }
}
