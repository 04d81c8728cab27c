//! Supervisor layer
//!
//! - Stall monitor spotting live events whose score stopped moving
//! - Alert manager delivering those alerts through the notifier

pub mod alert_manager;
pub mod stall_monitor;

pub use alert_manager::{AlertManager, AlertManagerConfig};
pub use stall_monitor::{StallAlert, StallMonitor};
