use thiserror::Error;

/// Main error type for the live event orchestrator
#[derive(Error, Debug)]
pub enum LivescoreError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Feed errors
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Detail fetch failed for {id}: {reason}")]
    TransientFetch { id: String, reason: String },

    #[error("Detail fetch for {id} timed out after {timeout_ms}ms")]
    FetchTimeout { id: String, timeout_ms: u64 },

    // Leadership errors
    #[error("Leadership lost: {0}")]
    LeadershipLost(String),

    // Store errors
    #[error("Store write failed for {id}: {reason}")]
    StoreWrite { id: String, reason: String },

    // Alerting errors
    #[error("Notification failed: {0}")]
    Notification(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for LivescoreError
pub type Result<T> = std::result::Result<T, LivescoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let timeout = LivescoreError::FetchTimeout {
            id: "42".to_string(),
            timeout_ms: 500,
        };
        assert_eq!(timeout.to_string(), "Detail fetch for 42 timed out after 500ms");

        let feed = LivescoreError::FeedUnavailable("summary returned 502".to_string());
        assert!(feed.to_string().contains("summary returned 502"));
    }
}
