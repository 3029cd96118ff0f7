//! Error types for SimulationClock

use thiserror::Error;

use crate::realtime::state::{ClockState, Trigger};
use crate::ClockMode;

/// Error type returned by tick listeners
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the SimulationClock
#[derive(Error, Debug)]
pub enum ClockError {
    #[error("Tick length must be positive, got {0}")]
    InvalidTickLength(i64),

    #[error("{0:?} is not a valid starting mode")]
    UnsupportedStartMode(ClockMode),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to access configuration file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Clock is not running")]
    ClockNotRunning,

    #[error("Clock is already running")]
    ClockAlreadyRunning,

    #[error("Listener is already registered")]
    ListenerAlreadyRegistered,

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("Single-step ticking is not supported by a push-scheduled clock")]
    SingleStepUnsupported,

    #[error("Tick dispatch re-entered from inside a listener")]
    ReentrantTick,

    #[error("Listener failed at time {time}: {source}")]
    Listener {
        time: i64,
        #[source]
        source: ListenerError,
    },

    #[error("Listener panicked: {message}")]
    ListenerPanicked { message: String },

    #[error("Failed to spawn tick scheduler thread: {0}")]
    SchedulerSpawn(#[source] std::io::Error),

    #[error("Tick scheduler terminated unexpectedly")]
    SchedulerUnavailable,
}

/// A trigger that the current state does not accept
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Trigger {trigger:?} is not allowed in state {from:?}")]
pub struct IllegalTransition {
    pub from: ClockState,
    pub trigger: Trigger,
}

/// Misuse of a [`crate::TimeLapse`] budget
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLapseError {
    #[error("Cannot consume {amount}, only {time_left} left in this tick")]
    InvalidAmount { amount: i64, time_left: i64 },
}
