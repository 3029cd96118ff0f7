//! Configuration for the pause monitor

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::MonitorError;
use crate::{DEFAULT_HORIZON_MS, DEFAULT_POLL_INTERVAL_MS};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PauseMonitorConfig {
    /// Pause log to tail. `None` disables the monitor (always zero pauses).
    pub log_path: Option<PathBuf>,

    /// How far back pauses are retained, in milliseconds (default: 10s)
    pub horizon_ms: u64,

    /// How often the tailer polls the log for appended lines
    pub poll_interval_ms: u64,

    /// Start reading from the beginning of the log instead of its current end
    pub read_from_start: bool,
}

impl Default for PauseMonitorConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            horizon_ms: DEFAULT_HORIZON_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_from_start: false,
        }
    }
}

impl PauseMonitorConfig {
    pub fn with_log_path(path: impl Into<PathBuf>) -> Self {
        Self { log_path: Some(path.into()), ..Default::default() }
    }

    pub fn horizon(&self) -> Duration {
        Duration::from_millis(self.horizon_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.horizon_ms == 0 {
            return Err(MonitorError::Config("horizon_ms must be positive".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(MonitorError::Config("poll_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}
