//! Clock construction

use std::sync::Arc;

use pause_monitor::{NoPauseMonitor, PauseMonitor, PauseMonitorConfig};

use crate::config::{ClockConfig, SchedulerConfig};
use crate::error::ClockError;
use crate::realtime::affinity::{platform_affinity, CpuAffinity};
use crate::realtime::RealtimeClock;
use crate::simulated::SimulatedClock;
use crate::{ClockMode, TimeUnit};

/// Builder for [`SimulatedClock`] and [`RealtimeClock`].
///
/// ```
/// use simulation_clock::{ClockBuilder, ClockMode, TimeUnit};
///
/// let clock = ClockBuilder::new()
///     .tick_length(50)
///     .time_unit(TimeUnit::Milliseconds)
///     .starting_mode(ClockMode::Simulated)
///     .build_realtime()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ClockBuilder {
    config: ClockConfig,
    pause_monitor: Option<Arc<dyn PauseMonitor>>,
    affinity: Option<Arc<dyn CpuAffinity>>,
}

impl Default for ClockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockBuilder {
    pub fn new() -> Self {
        Self::from_config(ClockConfig::default())
    }

    /// Start from a loaded configuration.
    ///
    /// The pause monitor described by `config.pause_monitor` is only started by
    /// [`ClockBuilder::build_realtime`], and only if none was supplied explicitly.
    pub fn from_config(config: ClockConfig) -> Self {
        Self { config, pause_monitor: None, affinity: None }
    }

    pub fn tick_length(mut self, tick_length: i64) -> Self {
        self.config.tick_length = tick_length;
        self
    }

    pub fn time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.config.time_unit = time_unit;
        self
    }

    /// Mode a real-time clock starts in. [`ClockMode::Stopped`] is rejected at build time.
    pub fn starting_mode(mut self, mode: ClockMode) -> Self {
        self.config.starting_mode = mode;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    pub fn pause_monitor_config(mut self, config: PauseMonitorConfig) -> Self {
        self.config.pause_monitor = config;
        self
    }

    pub fn pause_monitor(mut self, monitor: Arc<dyn PauseMonitor>) -> Self {
        self.pause_monitor = Some(monitor);
        self
    }

    pub fn cpu_affinity(mut self, affinity: Arc<dyn CpuAffinity>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn build_simulated(self) -> Result<SimulatedClock, ClockError> {
        self.config.validate()?;
        Ok(SimulatedClock::new(self.config.tick_length, self.config.time_unit))
    }

    pub fn build_realtime(self) -> Result<RealtimeClock, ClockError> {
        self.config.validate()?;

        let pause_monitor = match self.pause_monitor {
            Some(monitor) => monitor,
            None if self.config.pause_monitor.log_path.is_some() => {
                pause_monitor::monitor_from_config(&self.config.pause_monitor)
            }
            None => Arc::new(NoPauseMonitor),
        };
        let affinity = self.affinity.unwrap_or_else(platform_affinity);

        RealtimeClock::new(&self.config, affinity, pause_monitor)
    }
}
