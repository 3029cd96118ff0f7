//! Configuration for SimulationClock

use pause_monitor::PauseMonitorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ClockError;
use crate::{
    ClockMode, TimeUnit, DEFAULT_AWAIT_POLL_INTERVAL_MS, DEFAULT_MAX_RECORDED_TIMESTAMPS,
    DEFAULT_TICK_LENGTH,
};

/// Configuration for a clock
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockConfig {
    /// Length of one tick, in `time_unit` (default: 1000)
    pub tick_length: i64,

    /// Unit of `tick_length` and of the clock's current time (default: milliseconds)
    pub time_unit: TimeUnit,

    /// Mode a real-time clock starts in (default: RealTime)
    pub starting_mode: ClockMode,

    /// Real-time scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Pause accounting used by diagnostics
    pub pause_monitor: PauseMonitorConfig,
}

/// Real-time scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pin the scheduler thread to a single core
    pub enable_cpu_affinity: bool,

    /// Core to pin to; the last available core when unset
    pub pinned_core: Option<usize>,

    /// How often the thread blocked in `start()` checks on the scheduler
    pub await_poll_interval_ms: u64,

    /// Upper bound on retained real-time timestamps (oldest dropped first)
    pub max_recorded_timestamps: usize,

    /// Name of the scheduler thread
    pub thread_name: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_length: DEFAULT_TICK_LENGTH,
            time_unit: TimeUnit::Milliseconds,
            starting_mode: ClockMode::RealTime,
            scheduler: SchedulerConfig::default(),
            pause_monitor: PauseMonitorConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enable_cpu_affinity: true,
            pinned_core: None,
            await_poll_interval_ms: DEFAULT_AWAIT_POLL_INTERVAL_MS,
            max_recorded_timestamps: DEFAULT_MAX_RECORDED_TIMESTAMPS,
            thread_name: "tick-scheduler".to_string(),
        }
    }
}

impl ClockConfig {
    /// Reject configurations no clock can be built from
    pub fn validate(&self) -> Result<(), ClockError> {
        if self.tick_length <= 0 {
            return Err(ClockError::InvalidTickLength(self.tick_length));
        }
        if self.starting_mode == ClockMode::Stopped {
            return Err(ClockError::UnsupportedStartMode(self.starting_mode));
        }
        if self.time_unit.to_nanos(self.tick_length).is_none() {
            return Err(ClockError::Config(format!(
                "tick length {}{} overflows nanosecond range",
                self.tick_length, self.time_unit
            )));
        }
        self.scheduler.validate()
    }

    /// Get tick length as Duration
    pub fn tick_duration(&self) -> Option<Duration> {
        self.time_unit.to_duration(self.tick_length)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ClockError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClockConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), ClockError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ClockError> {
        if self.await_poll_interval_ms == 0 {
            return Err(ClockError::Config("await_poll_interval_ms must be positive".to_string()));
        }
        if self.max_recorded_timestamps < 2 {
            return Err(ClockError::Config(
                "max_recorded_timestamps must retain at least two timestamps".to_string(),
            ));
        }
        Ok(())
    }

    /// Get await poll interval as Duration
    pub fn await_poll_interval(&self) -> Duration {
        Duration::from_millis(self.await_poll_interval_ms)
    }

    /// Core the scheduler thread pins itself to, if pinning is enabled
    pub fn effective_core(&self) -> Option<usize> {
        self.enable_cpu_affinity
            .then(|| self.pinned_core.unwrap_or_else(crate::realtime::affinity::default_core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_config_default() {
        let config = ClockConfig::default();
        assert_eq!(config.tick_length, 1000);
        assert_eq!(config.time_unit, TimeUnit::Milliseconds);
        assert_eq!(config.starting_mode, ClockMode::RealTime);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clock_config_duration_conversion() {
        let config = ClockConfig::default();
        assert_eq!(config.tick_duration(), Some(Duration::from_secs(1)));
        assert_eq!(config.scheduler.await_poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = ClockConfig { tick_length: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ClockError::InvalidTickLength(0))));

        let config = ClockConfig { tick_length: -5, ..Default::default() };
        assert!(matches!(config.validate(), Err(ClockError::InvalidTickLength(-5))));

        let config = ClockConfig { starting_mode: ClockMode::Stopped, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(ClockError::UnsupportedStartMode(ClockMode::Stopped))
        ));

        let config = ClockConfig {
            tick_length: i64::MAX,
            time_unit: TimeUnit::Hours,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClockError::Config(_))));
    }

    #[test]
    fn test_effective_core() {
        let mut scheduler = SchedulerConfig { pinned_core: Some(2), ..Default::default() };
        assert_eq!(scheduler.effective_core(), Some(2));

        scheduler.enable_cpu_affinity = false;
        assert_eq!(scheduler.effective_core(), None);
    }
}
