//! HTTP client for the browser-automation sidecar
//!
//! The sidecar renders the livescore page and exposes what it intercepted as
//! JSON: `GET /live` returns the summary list, `GET /events/{id}` the raw
//! detail payload for one event.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::traits::FeedClient;
use crate::config::FeedConfig;
use crate::domain::EventSummary;
use crate::error::{LivescoreError, Result};

#[derive(Clone)]
pub struct HttpFeedClient {
    client: Client,
    base_url: String,
}

impl HttpFeedClient {
    pub fn new(cfg: &FeedConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    #[instrument(skip(self))]
    async fn list_live(&self) -> Result<Vec<EventSummary>> {
        let resp = self
            .client
            .get(self.url("live"))
            .send()
            .await
            .map_err(|e| LivescoreError::FeedUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(LivescoreError::FeedUnavailable(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| LivescoreError::FeedUnavailable(format!("invalid summary body: {e}")))?;
        let entries = body.as_array().ok_or_else(|| {
            LivescoreError::FeedUnavailable("summary body is not a list".to_string())
        })?;

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            match EventSummary::from_raw(entry) {
                Some(summary) => summaries.push(summary),
                None => warn!("Skipping feed entry without id: {}", entry),
            }
        }

        debug!("Feed reported {} live events", summaries.len());
        Ok(summaries)
    }

    #[instrument(skip(self))]
    async fn fetch_detail(&self, id: &str) -> Result<Value> {
        let transient = |reason: String| LivescoreError::TransientFetch {
            id: id.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(self.url(&format!("events/{id}")))
            .send()
            .await
            .map_err(|e| transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(transient(format!("HTTP {}", resp.status())));
        }

        resp.json().await.map_err(|e| transient(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = HttpFeedClient::new(&FeedConfig {
            base_url: "http://sidecar:9222/".to_string(),
            request_timeout_ms: 1_000,
            tournament_filter: None,
        })
        .unwrap();

        assert_eq!(client.url("live"), "http://sidecar:9222/live");
        assert_eq!(client.url("/events/12"), "http://sidecar:9222/events/12");
    }
}
