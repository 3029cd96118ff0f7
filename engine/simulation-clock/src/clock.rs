//! Clock contracts and the tick-dispatch core shared by every run mode

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ClockError;
use crate::event::{ClockEventType, EventDispatcher};
use crate::listener::{ListenerRegistry, TickListener};
use crate::{ClockMode, TimeLapse, TimeUnit};

/// Read-only view of a clock
pub trait Clock: Send + Sync {
    fn current_time(&self) -> i64;

    fn tick_length(&self) -> i64;

    fn time_unit(&self) -> TimeUnit;

    fn is_ticking(&self) -> bool;

    fn events(&self) -> &EventDispatcher;
}

/// A clock that can be driven
pub trait ClockController: Clock {
    /// Fails with [`ClockError::ListenerAlreadyRegistered`] if `listener` is already registered
    fn register(&self, listener: Arc<dyn TickListener>) -> Result<(), ClockError>;

    fn unregister(&self, listener: &Arc<dyn TickListener>) -> bool;

    /// Run the clock on the calling thread until it is stopped or a listener fails
    fn start(&self) -> Result<(), ClockError>;

    fn stop(&self) -> Result<(), ClockError>;

    /// Advance by exactly one tick
    fn tick(&self) -> Result<(), ClockError>;
}

/// A clock that can switch between real-time and simulated pacing while running
pub trait RealtimeClockController: ClockController {
    fn switch_to_real_time(&self) -> Result<(), ClockError>;

    fn switch_to_simulated_time(&self) -> Result<(), ClockError>;

    fn clock_mode(&self) -> ClockMode;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Completed,
    /// An interrupt arrived while ticking; the clock is no longer ticking
    Interrupted,
}

/// State and dispatch algorithm shared by the simulated and real-time clocks
pub(crate) struct ClockCore {
    tick_length: i64,
    time_unit: TimeUnit,
    current_time: AtomicI64,
    ticking: AtomicBool,
    interrupted: AtomicBool,
    listeners: ListenerRegistry,
    events: EventDispatcher,
    time_lapse: Mutex<TimeLapse>,
}

impl ClockCore {
    pub(crate) fn new(tick_length: i64, time_unit: TimeUnit) -> Self {
        Self {
            tick_length,
            time_unit,
            current_time: AtomicI64::new(0),
            ticking: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            listeners: ListenerRegistry::new(),
            events: EventDispatcher::new(),
            time_lapse: Mutex::new(TimeLapse::new(time_unit)),
        }
    }

    pub(crate) fn tick_length(&self) -> i64 {
        self.tick_length
    }

    pub(crate) fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub(crate) fn current_time(&self) -> i64 {
        self.current_time.load(Ordering::SeqCst)
    }

    pub(crate) fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }

    /// Set the ticking flag, returning `false` if it was already set
    pub(crate) fn begin_ticking(&self) -> bool {
        if self.ticking.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.interrupted.store(false, Ordering::SeqCst);
        true
    }

    /// Clear the ticking flag, returning whether it was set
    pub(crate) fn end_ticking(&self) -> bool {
        self.ticking.swap(false, Ordering::SeqCst)
    }

    /// Ask the execution thread to stop at the end of the current tick
    pub(crate) fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub(crate) fn publish(&self, event_type: ClockEventType) {
        self.events.publish(event_type, self.current_time());
    }

    pub(crate) fn register(&self, listener: Arc<dyn TickListener>) -> Result<(), ClockError> {
        if !self.listeners.register(listener) {
            return Err(ClockError::ListenerAlreadyRegistered);
        }
        tracing::debug!(listeners = self.listeners.len(), "Registered tick listener");
        Ok(())
    }

    pub(crate) fn unregister(&self, listener: &Arc<dyn TickListener>) -> bool {
        let removed = self.listeners.unregister(listener);
        if removed {
            tracing::debug!(listeners = self.listeners.len(), "Unregistered tick listener");
        }
        removed
    }

    /// Dispatch one tick to every registered listener and advance time
    pub(crate) fn run_one_tick(&self) -> Result<TickOutcome, ClockError> {
        let mut time_lapse = self.time_lapse.try_lock().ok_or(ClockError::ReentrantTick)?;

        let start = self.current_time();
        time_lapse.reset(start, start + self.tick_length);

        let listeners = self.listeners.snapshot();
        for listener in listeners.iter() {
            listener
                .tick(&mut time_lapse)
                .map_err(|source| ClockError::Listener { time: start, source })?;
        }

        time_lapse.consume_all();

        for listener in listeners.iter() {
            listener
                .after_tick(&time_lapse)
                .map_err(|source| ClockError::Listener { time: start, source })?;
        }
        drop(time_lapse);

        self.current_time.fetch_add(self.tick_length, Ordering::SeqCst);

        if self.interrupted.swap(false, Ordering::SeqCst) && self.end_ticking() {
            tracing::info!(time = self.current_time(), "Clock interrupted while ticking, stopping");
            return Ok(TickOutcome::Interrupted);
        }
        Ok(TickOutcome::Completed)
    }

    /// [`run_one_tick`](Self::run_one_tick) with listener panics reported as
    /// [`ClockError::ListenerPanicked`]
    pub(crate) fn run_one_tick_catching(&self) -> Result<TickOutcome, ClockError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_one_tick())) {
            Ok(result) => result,
            Err(payload) => Err(ClockError::ListenerPanicked { message: panic_message(payload.as_ref()) }),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
