pub mod api;
pub mod metrics;

pub use api::{router, ApiServer, ApiState};
pub use metrics::{Metrics, MetricsSnapshot};
