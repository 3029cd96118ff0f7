//! Clock that ticks as fast as its listeners allow

use std::sync::Arc;

use crate::clock::{Clock, ClockController, ClockCore, TickOutcome};
use crate::error::ClockError;
use crate::event::{ClockEventType, EventDispatcher};
use crate::listener::TickListener;
use crate::TimeUnit;

/// Simulated-time clock.
///
/// `start()` runs ticks back to back on the calling thread with no wall-clock
/// pacing. Clones share the same clock, so a clone can be handed to another
/// thread (or a listener) to stop it.
#[derive(Clone)]
pub struct SimulatedClock {
    core: Arc<ClockCore>,
}

impl SimulatedClock {
    pub(crate) fn new(tick_length: i64, time_unit: TimeUnit) -> Self {
        Self { core: Arc::new(ClockCore::new(tick_length, time_unit)) }
    }

    /// Stop at the end of the current tick. A no-op unless the clock is ticking.
    pub fn interrupt(&self) {
        self.core.interrupt();
    }
}

impl Clock for SimulatedClock {
    fn current_time(&self) -> i64 {
        self.core.current_time()
    }

    fn tick_length(&self) -> i64 {
        self.core.tick_length()
    }

    fn time_unit(&self) -> TimeUnit {
        self.core.time_unit()
    }

    fn is_ticking(&self) -> bool {
        self.core.is_ticking()
    }

    fn events(&self) -> &EventDispatcher {
        self.core.events()
    }
}

impl ClockController for SimulatedClock {
    fn register(&self, listener: Arc<dyn TickListener>) -> Result<(), ClockError> {
        self.core.register(listener)
    }

    fn unregister(&self, listener: &Arc<dyn TickListener>) -> bool {
        self.core.unregister(listener)
    }

    fn start(&self) -> Result<(), ClockError> {
        if !self.core.begin_ticking() {
            return Err(ClockError::ClockAlreadyRunning);
        }

        tracing::info!(
            tick_length = self.core.tick_length(),
            unit = %self.core.time_unit(),
            "Starting simulated clock"
        );
        self.core.publish(ClockEventType::Started);

        let mut result = Ok(());
        while self.core.is_ticking() {
            match self.core.run_one_tick_catching() {
                Ok(TickOutcome::Completed) => {}
                Ok(TickOutcome::Interrupted) => break,
                Err(e) => {
                    tracing::error!(time = self.core.current_time(), error = %e, "Tick failed, stopping simulated clock");
                    self.core.end_ticking();
                    result = Err(e);
                }
            }
        }

        tracing::info!(time = self.core.current_time(), "Simulated clock stopped");
        self.core.publish(ClockEventType::Stopped);
        result
    }

    fn stop(&self) -> Result<(), ClockError> {
        if !self.core.end_ticking() {
            return Err(ClockError::ClockNotRunning);
        }
        tracing::debug!(time = self.core.current_time(), "Stop requested");
        Ok(())
    }

    fn tick(&self) -> Result<(), ClockError> {
        if !self.core.begin_ticking() {
            return Err(ClockError::ClockAlreadyRunning);
        }
        let result = self.core.run_one_tick_catching();
        self.core.end_ticking();
        result.map(|_| ())
    }
}
