//! # SimulationClock
//!
//! The heartbeat of a discrete-event simulation: advances simulated time in fixed
//! ticks and hands every registered [`TickListener`] a consumable [`TimeLapse`]
//! budget for each tick.
//!
//! Two clocks are provided:
//!
//! - [`SimulatedClock`] ticks as fast as its listeners allow, on the thread that
//!   calls `start()`, and supports single-step [`ClockController::tick`].
//! - [`RealtimeClock`] additionally paces ticks against the wall clock on a
//!   dedicated, CPU-pinned scheduler thread, and can switch between real-time and
//!   simulated pacing while running. Per-tick [`Timestamp`]s are recorded for
//!   jitter analysis.
//!
//! Clocks are built with [`ClockBuilder`], optionally from a [`ClockConfig`]
//! loaded from TOML.

pub mod builder;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod listener;
pub mod realtime;
pub mod simulated;
pub mod time_lapse;
pub mod time_unit;


#[cfg(test)]
mod integration_tests;

pub use builder::ClockBuilder;
pub use clock::{Clock, ClockController, RealtimeClockController};
pub use config::{ClockConfig, SchedulerConfig};
pub use diagnostics::{JitterStats, TickLogStats, TickLogger};
pub use error::{ClockError, IllegalTransition, ListenerError, TimeLapseError};
pub use event::{ClockEvent, ClockEventType, EventDispatcher};
pub use listener::TickListener;
pub use realtime::affinity::{CpuAffinity, NoAffinity, PinLease};
pub use realtime::state::{ClockMode, ClockState, Trigger};
pub use realtime::timing::{MeasuredDeviation, TickInterval, Timestamp};
pub use realtime::RealtimeClock;
pub use simulated::SimulatedClock;
pub use time_lapse::TimeLapse;
pub use time_unit::TimeUnit;

/// Re-export the pause sidecar used for jitter attribution
pub use pause_monitor::{NoPauseMonitor, PauseMonitor, PauseMonitorConfig};

/// Current version of the SimulationClock
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tick length, in the clock's time unit
pub const DEFAULT_TICK_LENGTH: i64 = 1000;

/// Default interval at which `start()` checks on the real-time scheduler
pub const DEFAULT_AWAIT_POLL_INTERVAL_MS: u64 = 10;

/// Default number of real-time timestamps retained
pub const DEFAULT_MAX_RECORDED_TIMESTAMPS: usize = 100_000;
