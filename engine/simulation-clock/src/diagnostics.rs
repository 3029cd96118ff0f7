//! Tick timing diagnostics
//!
//! [`TickLogger`] measures how long each tick's dispatch takes and flags ticks that
//! overrun the nominal period. [`JitterStats`] summarises real-time inter-arrival
//! intervals. Both attribute slowness to runtime pauses when a
//! [`PauseMonitor`] is available; neither influences scheduling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pause_monitor::PauseMonitor;
use serde::{Deserialize, Serialize};

use crate::error::ListenerError;
use crate::listener::TickListener;
use crate::realtime::timing::TickInterval;
use crate::TimeLapse;

/// Default number of dispatch durations kept for percentiles
pub const DEFAULT_TICK_HISTORY: usize = 1024;

/// Snapshot of [`TickLogger`] measurements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickLogStats {
    /// Ticks measured since creation or the last reset
    pub ticks: u64,

    /// Ticks whose dispatch took longer than the nominal period
    pub slow_ticks: u64,

    pub last_dispatch_ns: u64,

    pub avg_dispatch_ns: u64,

    pub max_dispatch_ns: u64,

    /// 95th percentile over the retained history
    pub p95_dispatch_ns: u64,

    /// 99th percentile over the retained history
    pub p99_dispatch_ns: u64,

    /// Pause time reported while slow ticks were dispatching
    pub attributed_pause_ns: u64,
}

/// Listener that times the dispatch window of every tick.
///
/// The window runs from this listener's `tick` to its `after_tick`, so register it
/// before the listeners it should cover.
pub struct TickLogger {
    nominal_ns: u64,
    pause_monitor: Arc<dyn PauseMonitor>,
    tick_started: Mutex<Option<Instant>>,

    // Ring buffer of recent dispatch durations
    durations: Vec<AtomicU64>,

    total_ticks: AtomicU64,
    slow_ticks: AtomicU64,
    last_duration: AtomicU64,
    max_duration: AtomicU64,
    attributed_pause: AtomicU64,
}

impl TickLogger {
    pub fn new(nominal_period: Duration, pause_monitor: Arc<dyn PauseMonitor>) -> Self {
        Self::with_history(nominal_period, pause_monitor, DEFAULT_TICK_HISTORY)
    }

    pub fn with_history(
        nominal_period: Duration,
        pause_monitor: Arc<dyn PauseMonitor>,
        history_size: usize,
    ) -> Self {
        let history_size = history_size.max(1);
        let mut durations = Vec::with_capacity(history_size);
        for _ in 0..history_size {
            durations.push(AtomicU64::new(0));
        }

        Self {
            nominal_ns: u64::try_from(nominal_period.as_nanos()).unwrap_or(u64::MAX),
            pause_monitor,
            tick_started: Mutex::new(None),
            durations,
            total_ticks: AtomicU64::new(0),
            slow_ticks: AtomicU64::new(0),
            last_duration: AtomicU64::new(0),
            max_duration: AtomicU64::new(0),
            attributed_pause: AtomicU64::new(0),
        }
    }

    fn record(&self, time: i64, duration_ns: u64) {
        let tick = self.total_ticks.fetch_add(1, Ordering::Relaxed);
        let index = (tick as usize) % self.durations.len();
        self.durations[index].store(duration_ns, Ordering::Relaxed);
        self.last_duration.store(duration_ns, Ordering::Relaxed);
        self.max_duration.fetch_max(duration_ns, Ordering::Relaxed);

        metrics::counter!("simulation_clock_ticks_total", 1);
        metrics::histogram!("simulation_clock_tick_dispatch_ns", duration_ns as f64);

        if duration_ns > self.nominal_ns {
            let paused_ns = self.pause_monitor.pause_nanos_in_last(duration_ns);
            self.slow_ticks.fetch_add(1, Ordering::Relaxed);
            self.attributed_pause.fetch_add(paused_ns, Ordering::Relaxed);
            metrics::counter!("simulation_clock_slow_ticks_total", 1);

            tracing::warn!(
                time,
                dispatch_ns = duration_ns,
                nominal_ns = self.nominal_ns,
                paused_ns,
                "Tick dispatch exceeded nominal period"
            );
        }
    }

    pub fn stats(&self) -> TickLogStats {
        let ticks = self.total_ticks.load(Ordering::Relaxed);
        let retained = (ticks as usize).min(self.durations.len());

        let mut durations: Vec<u64> = self.durations[..retained]
            .iter()
            .map(|d| d.load(Ordering::Relaxed))
            .collect();
        durations.sort_unstable();

        let avg_dispatch_ns = if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        };

        TickLogStats {
            ticks,
            slow_ticks: self.slow_ticks.load(Ordering::Relaxed),
            last_dispatch_ns: self.last_duration.load(Ordering::Relaxed),
            avg_dispatch_ns,
            max_dispatch_ns: self.max_duration.load(Ordering::Relaxed),
            p95_dispatch_ns: percentile(&durations, 0.95),
            p99_dispatch_ns: percentile(&durations, 0.99),
            attributed_pause_ns: self.attributed_pause.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total_ticks.store(0, Ordering::Relaxed);
        self.slow_ticks.store(0, Ordering::Relaxed);
        self.last_duration.store(0, Ordering::Relaxed);
        self.max_duration.store(0, Ordering::Relaxed);
        self.attributed_pause.store(0, Ordering::Relaxed);
        for duration in &self.durations {
            duration.store(0, Ordering::Relaxed);
        }
        *self.tick_started.lock() = None;
    }
}

impl TickListener for TickLogger {
    fn tick(&self, _time_lapse: &mut TimeLapse) -> Result<(), ListenerError> {
        *self.tick_started.lock() = Some(Instant::now());
        Ok(())
    }

    fn after_tick(&self, time_lapse: &TimeLapse) -> Result<(), ListenerError> {
        if let Some(started) = self.tick_started.lock().take() {
            let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            self.record(time_lapse.start(), elapsed);
        }
        Ok(())
    }
}

/// `sorted` must be ascending
fn percentile(sorted: &[u64], quantile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = (sorted.len() as f64 * quantile) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Summary of real-time inter-arrival jitter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JitterStats {
    pub samples: usize,

    /// Nominal period the intervals are measured against
    pub period_ns: i64,

    pub mean_inter_arrival_ns: f64,
    pub min_inter_arrival_ns: i64,
    pub max_inter_arrival_ns: i64,

    /// Standard deviation of the inter-arrival times
    pub std_dev_ns: f64,

    pub mean_abs_deviation_ns: f64,
    pub max_abs_deviation_ns: i64,
    pub p99_abs_deviation_ns: i64,

    /// Pause time reported over the measured span
    pub pause_ns: u64,
}

impl JitterStats {
    pub fn from_intervals(intervals: &[TickInterval], period_ns: i64, pause_ns: u64) -> Self {
        if intervals.is_empty() {
            return Self { period_ns, pause_ns, ..Default::default() };
        }

        let arrivals: Vec<i64> = intervals.iter().map(TickInterval::inter_arrival_nanos).collect();
        let count = arrivals.len() as f64;
        let mean = arrivals.iter().map(|&a| a as f64).sum::<f64>() / count;
        let variance = arrivals.iter().map(|&a| (a as f64 - mean).powi(2)).sum::<f64>() / count;

        let mut deviations: Vec<i64> = arrivals.iter().map(|&a| (a - period_ns).abs()).collect();
        deviations.sort_unstable();
        let p99_index = ((deviations.len() as f64 * 0.99) as usize).min(deviations.len() - 1);

        Self {
            samples: arrivals.len(),
            period_ns,
            mean_inter_arrival_ns: mean,
            min_inter_arrival_ns: arrivals.iter().copied().min().unwrap_or(0),
            max_inter_arrival_ns: arrivals.iter().copied().max().unwrap_or(0),
            std_dev_ns: variance.sqrt(),
            mean_abs_deviation_ns: deviations.iter().map(|&d| d as f64).sum::<f64>() / count,
            max_abs_deviation_ns: deviations.last().copied().unwrap_or(0),
            p99_abs_deviation_ns: deviations[p99_index],
            pause_ns,
        }
    }

    pub fn log(&self) {
        tracing::info!(
            samples = self.samples,
            period_ns = self.period_ns,
            mean_ns = self.mean_inter_arrival_ns,
            std_dev_ns = self.std_dev_ns,
            max_abs_deviation_ns = self.max_abs_deviation_ns,
            p99_abs_deviation_ns = self.p99_abs_deviation_ns,
            pause_ns = self.pause_ns,
            "Real-time jitter"
        );
    }
}
