use anyhow::Context;
use futures::FutureExt;
use livescore::adapters::{
    FeedClient, HttpFeedClient, MemoryLeaseBackend, MemoryStore, Notifier, PostgresStore, Store,
    TelegramNotifier,
};
use livescore::config::{AppConfig, LoggingConfig};
use livescore::coordination::{
    install_signal_handlers, run_renewal, GracefulShutdown, LeaderElector, LeaseBackend,
};
use livescore::engine::Scheduler;
use livescore::services::{ApiServer, ApiState, Metrics};
use livescore::supervisor::{AlertManager, AlertManagerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", cfg.level)));

    let log_dir = std::env::var("LIVESCORE_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/livescore".to_string());

    // `rolling::daily` panics if it cannot create the first file, so probe first
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".livescore_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "livescore.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Lives as long as the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    } else {
        eprintln!(
            "Warning: Could not create log directory {}, file logging disabled",
            log_dir
        );
        None
    };

    let (json_layer, console_layer) = if cfg.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        eprintln!("Logging to: {}/livescore.log", log_dir);
    }
}

pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// Wire every component and run until a shutdown signal arrives
pub async fn run_orchestrator(config: AppConfig) -> anyhow::Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    let metrics = Arc::new(Metrics::new());

    // An unreachable store at startup is the one fatal runtime condition
    let (store, lease_backend, postgres): (Arc<dyn Store>, Arc<dyn LeaseBackend>, Option<PostgresStore>) =
        if config.database.in_memory {
            warn!("Using in-process store: state is lost on exit and leadership is local only");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryLeaseBackend::new()),
                None,
            )
        } else {
            let pg = PostgresStore::new(&config.database.url, config.database.max_connections)
                .await
                .context("connecting to PostgreSQL")?;
            pg.migrate().await.context("running migrations")?;
            pg.ping().await.context("store ping")?;
            (Arc::new(pg.clone()), Arc::new(pg.clone()), Some(pg))
        };

    let feed: Arc<dyn FeedClient> = Arc::new(HttpFeedClient::new(&config.feed)?);

    let mut alerts = AlertManager::new(AlertManagerConfig::from(&config.monitor))
        .with_metrics(Arc::clone(&metrics));
    match TelegramNotifier::from_config(&config.notifier) {
        Some(telegram) => {
            let notifier: Arc<dyn Notifier> = telegram;
            alerts = alerts.with_notifier(notifier);
        }
        None => warn!("Telegram not configured, stall alerts will only be logged"),
    }

    let shutdown = Arc::new(GracefulShutdown::with_defaults());
    install_signal_handlers(Arc::clone(&shutdown));

    let api_handle = config.api_port.map(|port| {
        let server = ApiServer::new(
            Arc::new(ApiState::new(Arc::clone(&store), Arc::clone(&metrics))),
            port,
        );
        let token = shutdown.token();
        tokio::spawn(async move {
            if let Err(e) = server.run(token).await {
                error!("Read API error: {}", e);
            }
        })
    });

    let elector = LeaderElector::new(lease_backend, &config.leader);
    info!(owner = %elector.owner_id(), resource = %config.leader.resource, "Joining leader election");
    let (leadership_tx, leadership_rx) = watch::channel(None);
    let renewal_handle = tokio::spawn(run_renewal(
        elector,
        config.leader.repoll_interval(),
        leadership_tx,
        shutdown.token(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        feed,
        Arc::clone(&store),
        &config,
        alerts,
        Arc::clone(&metrics),
    ));
    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        let token = shutdown.token();
        tokio::spawn(async move { scheduler.run(leadership_rx, token).await })
    };

    let status_handle = {
        let metrics = Arc::clone(&metrics);
        let mut token = shutdown.token();
        tokio::spawn(async move {
            let mut status_interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = status_interval.tick() => metrics.log_status(),
                }
            }
        })
    };

    info!("Orchestrator running. Press Ctrl+C to stop.");
    shutdown.token().cancelled().await;

    let result = shutdown
        .execute(
            async move {
                if let Err(e) = scheduler_handle.await {
                    error!("Scheduler task failed: {}", e);
                }
            }
            .boxed(),
            async move {
                match renewal_handle.await {
                    Ok(mut elector) => elector.release().await,
                    Err(e) => {
                        error!("Leader renewal task failed: {}", e);
                        false
                    }
                }
            }
            .boxed(),
            async move {
                status_handle.abort();
                if let Some(handle) = api_handle {
                    let _ = handle.await;
                }
                if let Some(pg) = postgres {
                    pg.close().await;
                }
            }
            .boxed(),
        )
        .await;

    result.map_err(|e| anyhow::anyhow!(e))
}
