//! Orchestration engine: lifecycle state machine, detail fan-out and the
//! leadership-gated cycle driver.

pub mod lifecycle;
pub mod scheduler;
pub mod worker_pool;

pub use lifecycle::{
    archive_reason, transition, ApplyReport, ArchiveReason, ArchiveReport, CommitReport,
    CyclePlan, LifecycleEngine, LifecyclePolicy, ReconcileReport, Transition,
};
pub use scheduler::{CycleReport, Scheduler};
pub use worker_pool::WorkerPool;
