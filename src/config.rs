use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub leader: LeaderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Read-side API port (disabled when unset)
    #[serde(default)]
    pub api_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the browser-automation sidecar serving summaries and details
    pub base_url: String,
    /// HTTP timeout for a single sidecar request in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Only track events whose tournament contains this text (case-insensitive)
    #[serde(default)]
    pub tournament_filter: Option<String>,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Keep everything in process memory (single instance, no persistence)
    #[serde(default)]
    pub in_memory: bool,
}

fn default_database_url() -> String {
    "postgres://localhost/livescore".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderConfig {
    /// Name of the shared lock guarding the poller role
    #[serde(default = "default_leader_resource")]
    pub resource: String,
    /// Lease lifetime in seconds
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    /// Non-leaders re-poll every `lease_duration / repoll_divisor`
    #[serde(default = "default_repoll_divisor")]
    pub repoll_divisor: u32,
    /// Stable identity for this process (generated when unset)
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn default_leader_resource() -> String {
    "livescore-poller".to_string()
}

fn default_lease_duration_secs() -> u64 {
    30
}

fn default_repoll_divisor() -> u32 {
    3
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            resource: default_leader_resource(),
            lease_duration_secs: default_lease_duration_secs(),
            repoll_divisor: default_repoll_divisor(),
            owner_id: None,
        }
    }
}

impl LeaderConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn repoll_interval(&self) -> Duration {
        self.lease_duration() / self.repoll_divisor.max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between orchestration cycles
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
}

fn default_cycle_interval_secs() -> u64 {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent detail fetches
    #[serde(default = "default_pool_size")]
    pub size: usize,
    /// Per-task detail fetch timeout in milliseconds
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
}

fn default_pool_size() -> usize {
    10
}

fn default_task_timeout_ms() -> u64 {
    20_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            task_timeout_ms: default_task_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Grace period an absent event spends quarantined before archival
    #[serde(default = "default_quarantine_period_secs")]
    pub quarantine_period_secs: u64,
    /// Records unseen for this long are archived regardless of status
    #[serde(default = "default_staleness_ceiling_secs")]
    pub staleness_ceiling_secs: u64,
    /// Archive records whose detail reports a finished event
    #[serde(default = "default_archive_completed")]
    pub archive_completed: bool,
}

fn default_quarantine_period_secs() -> u64 {
    120
}

fn default_staleness_ceiling_secs() -> u64 {
    15 * 60
}

fn default_archive_completed() -> bool {
    true
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            quarantine_period_secs: default_quarantine_period_secs(),
            staleness_ceiling_secs: default_staleness_ceiling_secs(),
            archive_completed: default_archive_completed(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds without a score change before an Active event counts as stalled
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
    /// Chat deliveries allowed per minute; the rest wait for a later scan
    #[serde(default = "default_max_alerts_per_minute")]
    pub max_alerts_per_minute: u32,
}

fn default_stall_threshold_secs() -> u64 {
    300
}

fn default_max_alerts_per_minute() -> u32 {
    20
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: default_stall_threshold_secs(),
            max_alerts_per_minute: default_max_alerts_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotifierConfig {
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("feed.base_url", "http://127.0.0.1:9222")?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LIVESCORE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // LIVESCORE_POOL__SIZE, LIVESCORE_LIFECYCLE__QUARANTINE_PERIOD_SECS, ...
            .add_source(
                Environment::with_prefix("LIVESCORE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Defaults suitable for a single in-memory instance against a local sidecar
    pub fn default_config(feed_url: &str) -> Self {
        Self {
            feed: FeedConfig {
                base_url: feed_url.to_string(),
                request_timeout_ms: default_request_timeout_ms(),
                tournament_filter: None,
            },
            database: DatabaseConfig {
                in_memory: true,
                ..DatabaseConfig::default()
            },
            leader: LeaderConfig::default(),
            scheduler: SchedulerConfig::default(),
            pool: PoolConfig::default(),
            lifecycle: LifecycleConfig::default(),
            monitor: MonitorConfig::default(),
            notifier: NotifierConfig::default(),
            logging: LoggingConfig::default(),
            api_port: Some(8080),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.feed.base_url.trim().is_empty() {
            errors.push("feed.base_url must not be empty".to_string());
        }

        if self.pool.size == 0 {
            errors.push("pool.size must be at least 1".to_string());
        }

        if self.pool.task_timeout_ms == 0 {
            errors.push("pool.task_timeout_ms must be positive".to_string());
        }

        if self.scheduler.cycle_interval_secs == 0 {
            errors.push("scheduler.cycle_interval_secs must be positive".to_string());
        }

        if self.leader.lease_duration_secs == 0 {
            errors.push("leader.lease_duration_secs must be positive".to_string());
        }

        if self.leader.repoll_divisor < 2 {
            errors.push(
                "leader.repoll_divisor must be at least 2 so renewal happens before expiry"
                    .to_string(),
            );
        }

        if self.lifecycle.quarantine_period_secs == 0 {
            errors.push("lifecycle.quarantine_period_secs must be positive".to_string());
        }

        if self.lifecycle.staleness_ceiling_secs < self.lifecycle.quarantine_period_secs {
            errors.push(
                "lifecycle.staleness_ceiling_secs should not be shorter than quarantine_period_secs"
                    .to_string(),
            );
        }

        if self.monitor.stall_threshold_secs == 0 {
            errors.push("monitor.stall_threshold_secs must be positive".to_string());
        }

        if self.monitor.max_alerts_per_minute == 0 {
            errors.push("monitor.max_alerts_per_minute must be >= 1".to_string());
        }

        if self.notifier.telegram_bot_token.is_some() != self.notifier.telegram_chat_id.is_some() {
            errors.push(
                "notifier.telegram_bot_token and notifier.telegram_chat_id must be set together"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default_config("http://127.0.0.1:9222");
        assert!(config.validate().is_ok());
        assert_eq!(config.lifecycle.staleness_ceiling_secs, 900);
        assert_eq!(config.leader.repoll_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let mut config = AppConfig::default_config("");
        config.pool.size = 0;
        config.lifecycle.staleness_ceiling_secs = 10;
        config.notifier.telegram_chat_id = Some("-100".to_string());
        config.monitor.max_alerts_per_minute = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| e.contains("max_alerts_per_minute")));
        assert!(errors.iter().any(|e| e.contains("pool.size")));
        assert!(errors.iter().any(|e| e.contains("telegram")));
    }
}
