//! Infrastructure - cold path only
//!
//! Non-latency-critical code:
//! - Configuration management
//! - Logging
//! - Listener metrics

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{Config, ConfigError};
pub use logging::init_logging;
pub use metrics::{LinkMetrics, MetricsSnapshot};
