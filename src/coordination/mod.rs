//! Coordination layer
//!
//! - Leader election so only one process polls the feed
//! - Graceful shutdown that drains the cycle and releases the lease

pub mod leader;
pub mod shutdown;

pub use leader::{
    default_owner_id, publish_leadership, run_renewal, LeaderElector, Leadership, LeaseBackend,
};
pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownError, ShutdownPhase,
    ShutdownSignal, ShutdownToken,
};
