pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod engine;
pub mod error;
pub mod services;
pub mod supervisor;

pub use adapters::{FeedClient, MemoryStore, Notifier, Partition, PostgresStore, Store};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, LeaderElector, LeaseBackend, ShutdownSignal};
pub use domain::{EventRecord, EventStatus, EventSummary, LeaseToken};
pub use engine::{LifecycleEngine, Scheduler, WorkerPool};
pub use error::{LivescoreError, Result};
pub use supervisor::{AlertManager, StallAlert, StallMonitor};
