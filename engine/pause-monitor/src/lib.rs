//! # PauseMonitor
//!
//! Tracks stop-the-world pauses reported by an external runtime log and answers
//! "how much pause time fell in the last N nanoseconds". The answer is only ever
//! used to explain timing jitter; nothing here blocks or throttles a caller.
//!
//! When no log is configured, or the log cannot be opened, [`monitor_from_config`]
//! hands back a [`NoPauseMonitor`] that always reports zero.

pub mod config;
pub mod error;
pub mod monitor;
pub mod parser;
pub mod window;

use std::sync::Arc;

pub use config::PauseMonitorConfig;
pub use error::MonitorError;
pub use monitor::GcLogMonitor;
pub use parser::parse_pause_line;
pub use window::{PauseEvent, PauseWindow};

/// Default trailing horizon (10s)
pub const DEFAULT_HORIZON_MS: u64 = 10_000;

/// Default tail poll interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Source of cumulative pause durations
pub trait PauseMonitor: Send + Sync {
    /// Total pause nanoseconds observed within the trailing `window_ns`
    fn pause_nanos_in_last(&self, window_ns: u64) -> u64;
}

/// Monitor used when no pause log is available
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPauseMonitor;

impl PauseMonitor for NoPauseMonitor {
    fn pause_nanos_in_last(&self, _window_ns: u64) -> u64 {
        0
    }
}

/// Build the monitor described by `config`, degrading to [`NoPauseMonitor`] on any failure
pub fn monitor_from_config(config: &PauseMonitorConfig) -> Arc<dyn PauseMonitor> {
    match GcLogMonitor::start(config.clone()) {
        Ok(monitor) => Arc::new(monitor),
        Err(MonitorError::NoLogConfigured) => {
            tracing::debug!("No pause log configured, pause accounting disabled");
            Arc::new(NoPauseMonitor)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Pause monitor unavailable, reporting zero pauses");
            Arc::new(NoPauseMonitor)
        }
    }
}
