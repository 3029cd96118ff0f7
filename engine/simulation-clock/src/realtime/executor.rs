//! Dedicated fixed-rate tick executor
//!
//! One worker thread, optionally pinned to a core, runs at most one fixed-rate
//! task at a time. The task body reports back through [`TaskStep`]; the final
//! outcome of the task is delivered on the channel supplied at schedule time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::clock::panic_message;
use crate::error::ClockError;
use crate::realtime::affinity::{CpuAffinity, PinLease};

/// What the task body asks for after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStep {
    Continue,
    Cancel,
    Complete,
}

#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Completed,
    Cancelled,
    Failed(ClockError),
}

pub(crate) type TaskBody = Box<dyn FnMut() -> Result<TaskStep, ClockError> + Send>;

pub(crate) struct ScheduledTask {
    period: Duration,
    body: TaskBody,
    cancelled: Arc<AtomicBool>,
    outcome: Sender<TaskOutcome>,
}

/// Handle used to cancel a scheduled task from any thread
#[derive(Clone)]
pub(crate) struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    wakeup: Sender<Command>,
}

impl TaskHandle {
    /// Cancel the task, waking the worker if it is waiting for its next run.
    /// A run already in progress completes first.
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.wakeup.send(Command::Wake);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

enum Command {
    Schedule(ScheduledTask),
    Wake,
    Shutdown,
}

/// Settings for the worker thread
#[derive(Clone)]
pub(crate) struct ExecutorSettings {
    pub thread_name: String,
    pub pin_core: Option<usize>,
    pub affinity: Arc<dyn CpuAffinity>,
}

pub(crate) struct TickExecutor {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
    lease: Arc<Mutex<Option<PinLease>>>,
    affinity: Arc<dyn CpuAffinity>,
}

impl TickExecutor {
    /// Spawn the worker and wait until it has (attempted to) pin itself
    pub(crate) fn spawn(settings: ExecutorSettings) -> Result<Self, ClockError> {
        let (commands_tx, commands_rx) = channel::unbounded::<Command>();
        let (ready_tx, ready_rx) = channel::bounded::<()>(1);
        let lease: Arc<Mutex<Option<PinLease>>> = Arc::new(Mutex::new(None));

        let worker_lease = lease.clone();
        let affinity = settings.affinity.clone();
        let pin_core = settings.pin_core;

        let worker = thread::Builder::new()
            .name(settings.thread_name.clone())
            .spawn(move || {
                if let Some(core) = pin_core {
                    match affinity.pin_current_thread(core) {
                        Ok(pin) => {
                            tracing::info!(core, "Tick scheduler thread pinned");
                            *worker_lease.lock() = Some(pin);
                        }
                        Err(e) => {
                            tracing::warn!(core, error = %e, "Could not pin tick scheduler thread, continuing unpinned");
                        }
                    }
                }
                let _ = ready_tx.send(());
                worker_loop(&commands_rx);
                tracing::debug!("Tick scheduler thread exiting");
            })
            .map_err(ClockError::SchedulerSpawn)?;

        let worker_id = worker.thread().id();
        if ready_rx.recv().is_err() {
            let _ = worker.join();
            return Err(ClockError::SchedulerUnavailable);
        }

        Ok(Self {
            commands: commands_tx,
            worker: Some(worker),
            worker_id,
            lease,
            affinity: settings.affinity,
        })
    }

    pub(crate) fn schedule(
        &self,
        period: Duration,
        body: TaskBody,
        outcome: Sender<TaskOutcome>,
    ) -> Result<TaskHandle, ClockError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = ScheduledTask { period, body, cancelled: cancelled.clone(), outcome };
        self.commands
            .send(Command::Schedule(task))
            .map_err(|_| ClockError::SchedulerUnavailable)?;
        Ok(TaskHandle { cancelled, wakeup: self.commands.clone() })
    }

    pub(crate) fn is_pinned(&self) -> bool {
        self.lease.lock().is_some()
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Release the CPU pin. Only the first call releases anything.
    pub(crate) fn release_pin(&self) {
        let lease = self.lease.lock().take();
        if let Some(lease) = lease {
            self.affinity.release(&lease);
            tracing::info!(core = lease.core(), "Released tick scheduler CPU pin");
        }
    }

    /// Stop the worker, release its pin and wait for it to exit.
    ///
    /// When called from the worker itself the join is skipped; the worker exits
    /// as soon as the current run returns.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        self.release_pin();

        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.is_worker_thread() {
            tracing::debug!("Tick executor shut down from its own thread, not joining");
            return;
        }
        if worker.join().is_err() {
            tracing::error!("Tick scheduler thread panicked during shutdown");
        }
    }
}

impl Drop for TickExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(commands: &Receiver<Command>) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Schedule(task) => {
                if run_fixed_rate(task, commands) == Exit::Shutdown {
                    return;
                }
            }
            Command::Wake => {}
            Command::Shutdown => return,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    TaskDone,
    Shutdown,
}

/// Run `task` every `period` until it finishes, fails or is cancelled.
///
/// Runs that start late are not skipped: the next deadline is always the previous
/// deadline plus one period, so a slow run is followed by back-to-back runs.
fn run_fixed_rate(mut task: ScheduledTask, commands: &Receiver<Command>) -> Exit {
    let mut next_run = Instant::now();

    loop {
        loop {
            if task.cancelled.load(Ordering::SeqCst) {
                let _ = task.outcome.send(TaskOutcome::Cancelled);
                return Exit::TaskDone;
            }
            match commands.recv_deadline(next_run) {
                Err(RecvTimeoutError::Timeout) => break,
                Ok(Command::Wake) => continue,
                Ok(Command::Schedule(rejected)) => {
                    tracing::warn!("Tick executor already running a task, rejecting new schedule");
                    let _ = rejected.outcome.send(TaskOutcome::Failed(ClockError::ClockAlreadyRunning));
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    task.cancelled.store(true, Ordering::SeqCst);
                    let _ = task.outcome.send(TaskOutcome::Cancelled);
                    return Exit::Shutdown;
                }
            }
        }

        let step = match panic::catch_unwind(AssertUnwindSafe(|| (task.body)())) {
            Ok(step) => step,
            Err(payload) => Err(ClockError::ListenerPanicked { message: panic_message(payload.as_ref()) }),
        };

        match step {
            Ok(TaskStep::Continue) => {}
            Ok(TaskStep::Cancel) => {
                task.cancelled.store(true, Ordering::SeqCst);
                let _ = task.outcome.send(TaskOutcome::Cancelled);
                return Exit::TaskDone;
            }
            Ok(TaskStep::Complete) => {
                let _ = task.outcome.send(TaskOutcome::Completed);
                return Exit::TaskDone;
            }
            Err(e) => {
                let _ = task.outcome.send(TaskOutcome::Failed(e));
                return Exit::TaskDone;
            }
        }

        next_run += task.period;
    }
}
