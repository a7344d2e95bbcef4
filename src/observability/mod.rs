// Observability: structured logging and Prometheus metrics

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{heartbeat, init as init_metrics, render as render_metrics, spawn_heartbeat, HEARTBEAT_INTERVAL};
