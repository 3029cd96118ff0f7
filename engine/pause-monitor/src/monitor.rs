//! Log-tailing pause monitor

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::PauseMonitorConfig;
use crate::error::MonitorError;
use crate::parser::parse_pause_line;
use crate::window::{PauseEvent, PauseWindow};
use crate::PauseMonitor;

/// Pause monitor backed by a tailed pause log.
///
/// The tailer thread only appends to the shared window; queries take the lock
/// briefly and never wait on I/O.
pub struct GcLogMonitor {
    window: Arc<Mutex<PauseWindow>>,
    epoch: Instant,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    log_path: Option<PathBuf>,
}

impl GcLogMonitor {
    /// Open the configured log and start tailing it on a background thread
    pub fn start(config: PauseMonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;
        let path = config.log_path.clone().ok_or(MonitorError::NoLogConfigured)?;

        let mut file = File::open(&path)
            .map_err(|source| MonitorError::LogUnavailable { path: path.clone(), source })?;
        let position = if config.read_from_start {
            0
        } else {
            file.seek(SeekFrom::End(0))
                .map_err(|source| MonitorError::LogUnavailable { path: path.clone(), source })?
        };

        let window = Arc::new(Mutex::new(PauseWindow::new(duration_ns(config.horizon()))));
        let epoch = Instant::now();
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let mut tailer = LogTailer {
            path: path.clone(),
            reader: BufReader::new(file),
            position,
            partial: String::new(),
        };
        let shared = window.clone();
        let poll = config.poll_interval();

        let worker = thread::Builder::new()
            .name("pause-monitor".to_string())
            .spawn(move || loop {
                match tailer.read_available() {
                    Ok(pauses) => {
                        if !pauses.is_empty() {
                            let now = duration_ns(epoch.elapsed());
                            let mut window = shared.lock();
                            for pause in pauses {
                                window.record(PauseEvent {
                                    occurred_at_ns: now,
                                    duration_ns: duration_ns(pause),
                                });
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %tailer.path.display(), error = %e, "Failed to read pause log");
                    }
                }

                match shutdown_rx.recv_timeout(poll) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(MonitorError::Spawn)?;

        tracing::info!(path = %path.display(), horizon_ms = config.horizon_ms, "Pause monitor started");

        Ok(Self {
            window,
            epoch,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            log_path: Some(path),
        })
    }

    /// Monitor with no log attached; pauses are fed through [`GcLogMonitor::record_pause`]
    pub fn without_log(horizon: Duration) -> Self {
        Self {
            window: Arc::new(Mutex::new(PauseWindow::new(duration_ns(horizon)))),
            epoch: Instant::now(),
            shutdown_tx: None,
            worker: None,
            log_path: None,
        }
    }

    /// Record a pause observed right now
    pub fn record_pause(&self, duration: Duration) {
        let now = self.now_ns();
        self.window.lock().record(PauseEvent { occurred_at_ns: now, duration_ns: duration_ns(duration) });
    }

    /// Monotonic nanoseconds since this monitor was created
    pub fn now_ns(&self) -> u64 {
        duration_ns(self.epoch.elapsed())
    }

    pub fn log_path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }

    pub fn is_tailing(&self) -> bool {
        self.worker.is_some()
    }

    /// Copy of the pauses currently retained in the window
    pub fn snapshot(&self) -> Vec<PauseEvent> {
        self.window.lock().iter().copied().collect()
    }

    /// Stop the tailer and wait for it to exit. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Pause log tailer panicked");
            }
            tracing::info!("Pause monitor stopped");
        }
    }
}

impl PauseMonitor for GcLogMonitor {
    fn pause_nanos_in_last(&self, window_ns: u64) -> u64 {
        let now = self.now_ns();
        let mut window = self.window.lock();
        window.prune(now);
        window.cumulative_in_last(now, window_ns)
    }
}

impl Drop for GcLogMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LogTailer {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    partial: String,
}

impl LogTailer {
    /// Read every complete line appended since the last call
    fn read_available(&mut self) -> std::io::Result<Vec<Duration>> {
        let len = std::fs::metadata(&self.path)?.len();
        if len < self.position {
            tracing::debug!(path = %self.path.display(), "Pause log truncated, reopening");
            self.reader = BufReader::new(File::open(&self.path)?);
            self.position = 0;
            self.partial.clear();
        }

        let mut pauses = Vec::new();
        loop {
            let read = self.reader.read_line(&mut self.partial)?;
            if read == 0 {
                break;
            }
            self.position += read as u64;
            if !self.partial.ends_with('\n') {
                // writer is mid-line, finish it on the next poll
                break;
            }
            if let Some(pause) = parse_pause_line(&self.partial) {
                pauses.push(pause);
            }
            self.partial.clear();
        }
        Ok(pauses)
    }
}

fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
