//! Observability for scan runs
//!
//! This module provides:
//! - Structured logging with JSON format support
//! - Scan counters with Prometheus text export

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{Counter, MetricsSnapshot, ScanMetrics};
