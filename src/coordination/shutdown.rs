//! Graceful Shutdown Handler
//!
//! Lets the in-flight cycle finish, gives the leader lease back so a standby
//! can take over without waiting for expiry, then closes connections.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - shorter drain window
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Total timeout for graceful shutdown (default: 90s)
    pub total_timeout_secs: u64,
    /// Time allowed for the in-flight cycle to finish (default: 60s)
    pub cycle_drain_timeout_secs: u64,
    /// Drain window after an urgent signal (default: 5s)
    pub urgent_drain_timeout_secs: u64,
    /// Time allowed to release the leader lease (default: 5s)
    pub release_timeout_secs: u64,
    /// Time allowed to close store connections (default: 10s)
    pub close_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: 90,
            cycle_drain_timeout_secs: 60,
            urgent_drain_timeout_secs: 5,
            release_timeout_secs: 5,
            close_timeout_secs: 10,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// Waiting for the current cycle to complete
    DrainingCycle,
    /// Handing the leader lease back
    ReleasingLeadership,
    ClosingConnections,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::DrainingCycle => write!(f, "draining_cycle"),
            ShutdownPhase::ReleasingLeadership => write!(f, "releasing_leadership"),
            ShutdownPhase::ClosingConnections => write!(f, "closing_connections"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// Shutdown timed out
    Timeout,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout => write!(f, "shutdown timed out"),
        }
    }
}

impl std::error::Error for ShutdownError {}

const SIGNAL_NONE: u8 = 0;
const SIGNAL_GRACEFUL: u8 = 1;
const SIGNAL_URGENT: u8 = 2;

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    signal: AtomicU8,
    requested_tx: watch::Sender<bool>,
    phase: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (requested_tx, _) = watch::channel(false);
        let (phase, _) = watch::channel(ShutdownPhase::Running);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            signal: AtomicU8::new(SIGNAL_NONE),
            requested_tx,
            phase,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Signal that triggered the shutdown, if any
    pub fn signal(&self) -> Option<ShutdownSignal> {
        match self.signal.load(Ordering::SeqCst) {
            SIGNAL_GRACEFUL => Some(ShutdownSignal::Graceful),
            SIGNAL_URGENT => Some(ShutdownSignal::Urgent),
            _ => None,
        }
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        let code = match signal {
            ShutdownSignal::Graceful => SIGNAL_GRACEFUL,
            ShutdownSignal::Urgent => SIGNAL_URGENT,
        };
        self.signal.store(code, Ordering::SeqCst);

        info!("Shutdown requested: {}", signal);
        self.requested_tx.send_replace(true);
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Token handed to long-running tasks so they can stop between units of work
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            requested_rx: self.requested_tx.subscribe(),
            phase_rx: self.phase.subscribe(),
        }
    }

    /// Execute the shutdown sequence
    ///
    /// 1. Wait for the scheduler to finish its in-flight cycle
    /// 2. Release the leader lease
    /// 3. Close store connections
    pub async fn execute(
        &self,
        drain_cycle: BoxFuture<'_, ()>,
        release_leadership: BoxFuture<'_, bool>,
        close_connections: BoxFuture<'_, ()>,
    ) -> Result<(), ShutdownError> {
        let start = std::time::Instant::now();
        let total_timeout = Duration::from_secs(self.config.total_timeout_secs);

        info!(
            "Starting graceful shutdown (timeout: {}s)",
            self.config.total_timeout_secs
        );

        // Phase 1: let the current cycle finish
        self.set_phase(ShutdownPhase::DrainingCycle);
        let drain_secs = match self.signal() {
            Some(ShutdownSignal::Urgent) => self.config.urgent_drain_timeout_secs,
            _ => self.config.cycle_drain_timeout_secs,
        };
        match tokio::time::timeout(Duration::from_secs(drain_secs), drain_cycle).await {
            Ok(()) => debug!("Scheduler drained"),
            Err(_) => warn!("Cycle drain timeout after {}s, abandoning cycle", drain_secs),
        }

        if start.elapsed() > total_timeout {
            error!("Total shutdown timeout exceeded");
            self.set_phase(ShutdownPhase::Complete);
            return Err(ShutdownError::Timeout);
        }

        // Phase 2: release leadership
        self.set_phase(ShutdownPhase::ReleasingLeadership);
        let release_timeout = Duration::from_secs(self.config.release_timeout_secs);
        match tokio::time::timeout(release_timeout, release_leadership).await {
            Ok(true) => info!("Leader lease released"),
            Ok(false) => debug!("No leader lease held"),
            Err(_) => warn!(
                "Lease release timeout after {}s, standby will wait for expiry",
                self.config.release_timeout_secs
            ),
        }

        // Phase 3: close connections
        self.set_phase(ShutdownPhase::ClosingConnections);
        let close_timeout = Duration::from_secs(self.config.close_timeout_secs);
        if tokio::time::timeout(close_timeout, close_connections)
            .await
            .is_err()
        {
            warn!("Connection close timeout after {}s", self.config.close_timeout_secs);
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());
        Ok(())
    }
}

/// Token for checking shutdown status in async tasks
#[derive(Clone)]
pub struct ShutdownToken {
    requested_rx: watch::Receiver<bool>,
    phase_rx: watch::Receiver<ShutdownPhase>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        *self.requested_rx.borrow()
    }

    /// Resolves once shutdown has been requested (immediately if it already was)
    pub async fn cancelled(&mut self) {
        while !*self.requested_rx.borrow_and_update() {
            if self.requested_rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Wait for specific phase
    pub async fn wait_for_phase(&mut self, target: ShutdownPhase) {
        while *self.phase_rx.borrow_and_update() != target {
            if self.phase_rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ];

        for (kind, name, kind_signal) in handlers {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut stream = match signal(kind) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                        return;
                    }
                };
                stream.recv().await;
                info!("Received {}", name);
                shutdown.request_shutdown(kind_signal);
            });
        }
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}
