//! Real-time clock
//!
//! A [`RealtimeClock`] ticks in one of two paces and can move between them while
//! running:
//!
//! - **real time**: a fixed-rate task on a dedicated, CPU-pinned scheduler thread
//!   runs one tick per `tick_length` of wall-clock time;
//! - **simulated**: ticks run back to back on the thread blocked in `start()`.
//!
//! Mode switches requested while running are recorded as a pending flag and
//! applied at the next tick boundary. A request for real time always wins over a
//! request for simulated time made in the same tick.

pub mod affinity;
pub(crate) mod executor;
pub mod state;
pub mod timing;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use pause_monitor::PauseMonitor;

use crate::clock::{Clock, ClockController, ClockCore, RealtimeClockController, TickOutcome};
use crate::config::{ClockConfig, SchedulerConfig};
use crate::diagnostics::JitterStats;
use crate::error::ClockError;
use crate::event::{ClockEventType, EventDispatcher};
use crate::listener::TickListener;
use crate::TimeUnit;

use affinity::CpuAffinity;
use executor::{ExecutorSettings, TaskBody, TaskHandle, TaskOutcome, TaskStep, TickExecutor};
use state::{ClockMode, ClockState, Trigger};
use timing::{MeasuredDeviation, TickInterval, Timestamp};

const NO_SWITCH: u8 = 0;
const TO_SIMULATED: u8 = 1;
const TO_REAL_TIME: u8 = 2;

/// Everything the scheduler thread touches
struct TickContext {
    core: ClockCore,
    pending: AtomicU8,
    timestamps: Mutex<VecDeque<Timestamp>>,
    max_timestamps: usize,
    /// Ticks since the current real-time segment began
    tick_counter: AtomicU64,
    epoch: Instant,
}

impl TickContext {
    fn record_timestamp(&self) {
        let timestamp = Timestamp {
            tick_count: self.tick_counter.fetch_add(1, Ordering::SeqCst),
            wall_clock_millis: Utc::now().timestamp_millis(),
            monotonic_nanos: i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX),
        };

        let mut timestamps = self.timestamps.lock();
        while timestamps.len() >= self.max_timestamps {
            timestamps.pop_front();
        }
        timestamps.push_back(timestamp);
    }

    /// One fixed-rate run: record when it started, then tick
    fn run_scheduled_tick(&self) -> Result<TaskStep, ClockError> {
        if !self.core.is_ticking() {
            return Ok(TaskStep::Complete);
        }

        self.record_timestamp();
        if self.core.run_one_tick()? == TickOutcome::Interrupted || !self.core.is_ticking() {
            return Ok(TaskStep::Complete);
        }

        if self.pending.load(Ordering::SeqCst) == TO_SIMULATED {
            tracing::debug!(time = self.core.current_time(), "Leaving real-time segment for simulated time");
            return Ok(TaskStep::Cancel);
        }
        Ok(TaskStep::Continue)
    }
}

struct Inner {
    ctx: Arc<TickContext>,
    state: Mutex<ClockState>,
    executor: Mutex<Option<TickExecutor>>,
    active_task: Mutex<Option<TaskHandle>>,
    scheduler: SchedulerConfig,
    period: Duration,
    affinity: Arc<dyn CpuAffinity>,
    pause_monitor: Arc<dyn PauseMonitor>,
}

/// Clock that can tick at wall-clock pace or as fast as possible, switching while running.
///
/// Cloning yields another handle to the same clock.
#[derive(Clone)]
pub struct RealtimeClock {
    inner: Arc<Inner>,
}

impl RealtimeClock {
    pub(crate) fn new(
        config: &ClockConfig,
        affinity: Arc<dyn CpuAffinity>,
        pause_monitor: Arc<dyn PauseMonitor>,
    ) -> Result<Self, ClockError> {
        config.validate()?;

        let state = ClockState::initial(config.starting_mode)
            .ok_or(ClockError::UnsupportedStartMode(config.starting_mode))?;
        let period = config.tick_duration().ok_or_else(|| {
            ClockError::Config(format!("tick length {} is not a valid period", config.tick_length))
        })?;

        let ctx = TickContext {
            core: ClockCore::new(config.tick_length, config.time_unit),
            pending: AtomicU8::new(NO_SWITCH),
            timestamps: Mutex::new(VecDeque::new()),
            max_timestamps: config.scheduler.max_recorded_timestamps,
            tick_counter: AtomicU64::new(0),
            epoch: Instant::now(),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                ctx: Arc::new(ctx),
                state: Mutex::new(state),
                executor: Mutex::new(None),
                active_task: Mutex::new(None),
                scheduler: config.scheduler.clone(),
                period,
                affinity,
                pause_monitor,
            }),
        })
    }

    fn core(&self) -> &ClockCore {
        &self.inner.ctx.core
    }

    /// Nominal wall-clock length of one real-time tick
    pub fn period(&self) -> Duration {
        self.inner.period
    }

    pub fn state(&self) -> ClockState {
        *self.inner.state.lock()
    }

    /// Stop at the end of the current tick, as if `stop()` had been called
    pub fn interrupt(&self) {
        self.core().interrupt();
    }

    /// Whether the scheduler thread currently holds a CPU pin
    pub fn is_pinned(&self) -> bool {
        self.inner.executor.lock().as_ref().map_or(false, TickExecutor::is_pinned)
    }

    pub fn pause_monitor(&self) -> &Arc<dyn PauseMonitor> {
        &self.inner.pause_monitor
    }

    /// Recorded real-time tick starts, oldest first
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.inner.ctx.timestamps.lock().iter().copied().collect()
    }

    pub fn tick_intervals(&self) -> Vec<TickInterval> {
        timing::intervals(&self.timestamps())
    }

    pub fn measured_deviations(&self) -> Vec<MeasuredDeviation> {
        timing::deviations(&self.timestamps(), self.period_nanos())
    }

    /// Jitter over the recorded history, with the pause time that fell inside it
    pub fn jitter_stats(&self) -> JitterStats {
        let timestamps = self.timestamps();
        let span = match (timestamps.first(), timestamps.last()) {
            (Some(first), Some(last)) => (last.monotonic_nanos - first.monotonic_nanos).max(0) as u64,
            _ => 0,
        };
        let pause_ns = if span > 0 { self.inner.pause_monitor.pause_nanos_in_last(span) } else { 0 };
        JitterStats::from_intervals(&timing::intervals(&timestamps), self.period_nanos(), pause_ns)
    }

    fn period_nanos(&self) -> i64 {
        i64::try_from(self.inner.period.as_nanos()).unwrap_or(i64::MAX)
    }

    /// Spawn the scheduler thread if it is not running yet. Callers hold the state lock.
    fn ensure_executor(&self) -> Result<(), ClockError> {
        let mut executor = self.inner.executor.lock();
        if executor.is_none() {
            let settings = ExecutorSettings {
                thread_name: self.inner.scheduler.thread_name.clone(),
                pin_core: self.inner.scheduler.effective_core(),
                affinity: self.inner.affinity.clone(),
            };
            *executor = Some(TickExecutor::spawn(settings)?);
            tracing::debug!(thread = %self.inner.scheduler.thread_name, "Tick scheduler thread started");
        }
        Ok(())
    }

    /// Cancel the scheduled task, stop the scheduler thread and release its pin.
    /// Only the caller that takes the executor does the teardown.
    fn release_scheduler(&self) {
        if let Some(task) = self.inner.active_task.lock().take() {
            task.cancel();
        }
        let executor = self.inner.executor.lock().take();
        if let Some(mut executor) = executor {
            executor.shutdown();
        }
    }

    fn publish_mode(&self, mode: ClockMode) {
        let event = match mode {
            ClockMode::RealTime => ClockEventType::SwitchToRealTime,
            ClockMode::Simulated => ClockEventType::SwitchToSimTime,
            ClockMode::Stopped => return,
        };
        tracing::info!(mode = ?mode, time = self.core().current_time(), "Clock mode switched");
        self.core().publish(event);
    }

    fn run_loop(&self) -> Result<(), ClockError> {
        while self.core().is_ticking() {
            let state = self.state();
            match state {
                ClockState::RealtimeRunning => self.run_realtime()?,
                ClockState::SimulatedRunning => self.run_simulated()?,
                _ => return Ok(()),
            }
            self.apply_pending_switch()?;
        }
        Ok(())
    }

    /// Run one real-time segment on the scheduler thread and wait for it to end
    fn run_realtime(&self) -> Result<(), ClockError> {
        let (outcome_tx, outcome_rx) = channel::bounded(1);
        let handle = {
            let state = self.inner.state.lock();
            if *state != ClockState::RealtimeRunning {
                return Ok(());
            }
            self.ensure_executor()?;

            let ctx = self.inner.ctx.clone();
            let body: TaskBody = Box::new(move || ctx.run_scheduled_tick());

            let executor = self.inner.executor.lock();
            let executor = executor.as_ref().ok_or(ClockError::SchedulerUnavailable)?;
            let handle = executor.schedule(self.inner.period, body, outcome_tx)?;
            *self.inner.active_task.lock() = Some(handle.clone());
            handle
        };

        tracing::debug!(period_ns = self.period_nanos(), "Real-time segment scheduled");
        let result = self.await_task(&outcome_rx, &handle);
        self.inner.active_task.lock().take();
        result
    }

    fn await_task(&self, outcomes: &Receiver<TaskOutcome>, handle: &TaskHandle) -> Result<(), ClockError> {
        let poll = self.inner.scheduler.await_poll_interval();
        loop {
            match outcomes.recv_timeout(poll) {
                Ok(TaskOutcome::Completed) | Ok(TaskOutcome::Cancelled) => return Ok(()),
                Ok(TaskOutcome::Failed(e)) => return Err(e),
                Err(RecvTimeoutError::Timeout) => {
                    if !self.core().is_ticking() && !handle.is_cancelled() {
                        handle.cancel();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // a concurrent stop() tore the scheduler down before it picked the task up
                    if self.core().is_ticking() {
                        return Err(ClockError::SchedulerUnavailable);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Tick on the calling thread until stopped or real time is requested
    fn run_simulated(&self) -> Result<(), ClockError> {
        let ctx = &self.inner.ctx;
        while ctx.core.is_ticking() && ctx.pending.load(Ordering::SeqCst) != TO_REAL_TIME {
            if ctx.core.run_one_tick_catching()? == TickOutcome::Interrupted {
                break;
            }
        }
        Ok(())
    }

    /// Apply a pending mode switch at a tick boundary
    fn apply_pending_switch(&self) -> Result<(), ClockError> {
        let switched = {
            let mut state = self.inner.state.lock();
            let pending = self.inner.ctx.pending.swap(NO_SWITCH, Ordering::SeqCst);
            let trigger = match (pending, *state) {
                (TO_SIMULATED, ClockState::RealtimeRunning) => Some(Trigger::DoSimulated),
                (TO_REAL_TIME, ClockState::SimulatedRunning) => Some(Trigger::DoRealTime),
                _ => None,
            };

            match trigger {
                Some(trigger) => {
                    let before = state.mode();
                    *state = state.on(trigger)?;
                    if trigger == Trigger::DoRealTime {
                        self.inner.ctx.tick_counter.store(0, Ordering::SeqCst);
                    }
                    tracing::debug!(?trigger, state = ?*state, "Applied pending mode switch");
                    (state.mode() != before).then(|| state.mode())
                }
                None => {
                    if pending != NO_SWITCH {
                        tracing::debug!(pending, state = ?*state, "Ignoring stale mode switch request");
                    }
                    None
                }
            }
        };

        if let Some(mode) = switched {
            self.publish_mode(mode);
        }
        Ok(())
    }
}

impl Clock for RealtimeClock {
    fn current_time(&self) -> i64 {
        self.core().current_time()
    }

    fn tick_length(&self) -> i64 {
        self.core().tick_length()
    }

    fn time_unit(&self) -> TimeUnit {
        self.core().time_unit()
    }

    fn is_ticking(&self) -> bool {
        self.core().is_ticking()
    }

    fn events(&self) -> &EventDispatcher {
        self.core().events()
    }
}

impl ClockController for RealtimeClock {
    fn register(&self, listener: Arc<dyn TickListener>) -> Result<(), ClockError> {
        self.core().register(listener)
    }

    fn unregister(&self, listener: &Arc<dyn TickListener>) -> bool {
        self.core().unregister(listener)
    }

    fn start(&self) -> Result<(), ClockError> {
        {
            let mut state = self.inner.state.lock();
            if state.is_running() {
                return Err(ClockError::ClockAlreadyRunning);
            }
            let next = state.on(Trigger::Start)?;
            if next == ClockState::RealtimeRunning {
                self.ensure_executor()?;
                self.inner.ctx.tick_counter.store(0, Ordering::SeqCst);
            }
            *state = next;
            self.core().begin_ticking();
        }

        tracing::info!(
            mode = ?self.clock_mode(),
            tick_length = self.core().tick_length(),
            unit = %self.core().time_unit(),
            "Starting real-time clock"
        );
        self.core().publish(ClockEventType::Started);

        let result = self.run_loop();
        if let Err(e) = &result {
            tracing::error!(time = self.core().current_time(), error = %e, "Real-time clock failed, shutting down");
        }

        {
            let mut state = self.inner.state.lock();
            if state.is_running() {
                *state = state.on(Trigger::Stop)?;
            }
        }
        self.core().end_ticking();
        self.release_scheduler();

        tracing::info!(time = self.core().current_time(), "Real-time clock stopped");
        self.core().publish(ClockEventType::Stopped);
        result
    }

    fn stop(&self) -> Result<(), ClockError> {
        let was_running = {
            let mut state = self.inner.state.lock();
            let was_running = state.is_running();
            *state = state.on(Trigger::Stop)?;
            was_running
        };
        self.core().end_ticking();

        if was_running {
            tracing::debug!(time = self.core().current_time(), "Stop requested");
        }
        self.release_scheduler();
        Ok(())
    }

    fn tick(&self) -> Result<(), ClockError> {
        Err(ClockError::SingleStepUnsupported)
    }
}

impl RealtimeClockController for RealtimeClock {
    fn switch_to_real_time(&self) -> Result<(), ClockError> {
        let mut state = self.inner.state.lock();
        let current = *state;
        if current == ClockState::InitRealTime {
            return Ok(());
        }

        let next = current.on(Trigger::RequestRealTime)?;
        *state = next;
        match current {
            ClockState::RealtimeRunning => {
                let _ = self.inner.ctx.pending.compare_exchange(
                    TO_SIMULATED,
                    NO_SWITCH,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
            }
            ClockState::SimulatedRunning => self.inner.ctx.pending.store(TO_REAL_TIME, Ordering::SeqCst),
            _ => {}
        }
        drop(state);

        if next.mode() != current.mode() {
            self.publish_mode(next.mode());
        }
        Ok(())
    }

    fn switch_to_simulated_time(&self) -> Result<(), ClockError> {
        let mut state = self.inner.state.lock();
        let current = *state;
        if current == ClockState::InitSimulated {
            return Ok(());
        }

        let next = current.on(Trigger::RequestSimulated)?;
        *state = next;
        if current == ClockState::RealtimeRunning {
            let _ = self.inner.ctx.pending.compare_exchange(
                NO_SWITCH,
                TO_SIMULATED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
        drop(state);

        if next.mode() != current.mode() {
            self.publish_mode(next.mode());
        }
        Ok(())
    }

    fn clock_mode(&self) -> ClockMode {
        self.state().mode()
    }
}
