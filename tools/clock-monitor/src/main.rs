mod logging;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use simulation_clock::{
    Clock, ClockBuilder, ClockConfig, ClockController, ClockEvent, ClockMode, JitterStats,
    ListenerError, RealtimeClock, RealtimeClockController, TickListener, TickLogStats, TickLogger,
    TimeLapse, TimeUnit,
};

#[derive(Parser)]
#[command(name = "clock-monitor")]
#[command(about = "Drive a simulation clock with synthetic listeners and report tick timing")]
#[command(version = "0.1.0")]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format: default, pretty or json
    #[arg(long, default_value = "default", global = true)]
    log_format: String,

    /// Clock configuration file (TOML); command-line options override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the Prometheus metrics snapshot after the run
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tick as fast as possible for a fixed number of ticks
    Simulated {
        #[arg(short, long)]
        tick_length: Option<i64>,

        #[arg(short, long, value_enum)]
        unit: Option<UnitArg>,

        /// Number of ticks to run
        #[arg(short = 'n', long, default_value = "1000")]
        ticks: u64,

        /// Wall-clock work each tick performs, in microseconds
        #[arg(short, long, default_value = "0")]
        work_us: u64,
    },

    /// Tick against the wall clock, optionally detouring through simulated time
    Realtime {
        #[arg(short, long)]
        tick_length: Option<i64>,

        #[arg(short, long, value_enum)]
        unit: Option<UnitArg>,

        /// Run duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Wall-clock work each tick performs, in microseconds
        #[arg(short, long, default_value = "0")]
        work_us: u64,

        /// Switch to simulated time after this many ticks
        #[arg(long)]
        switch_after: Option<u64>,

        /// Ticks to spend in simulated time before switching back
        #[arg(long, default_value = "100")]
        simulated_ticks: u64,

        /// GC or safepoint log to attribute pauses from
        #[arg(long)]
        pause_log: Option<PathBuf>,

        /// Core to pin the scheduler thread to
        #[arg(long)]
        pinned_core: Option<usize>,

        /// Do not pin the scheduler thread
        #[arg(long)]
        no_pin: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum UnitArg {
    Ns,
    Us,
    Ms,
    S,
}

impl From<UnitArg> for TimeUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::Ns => TimeUnit::Nanoseconds,
            UnitArg::Us => TimeUnit::Microseconds,
            UnitArg::Ms => TimeUnit::Milliseconds,
            UnitArg::S => TimeUnit::Seconds,
        }
    }
}

/// Burns wall-clock time and consumes half of each tick's budget
struct SyntheticLoad {
    work: Duration,
}

impl TickListener for SyntheticLoad {
    fn tick(&self, time_lapse: &mut TimeLapse) -> Result<(), ListenerError> {
        if !self.work.is_zero() {
            let started = Instant::now();
            while started.elapsed() < self.work {
                std::hint::spin_loop();
            }
        }
        time_lapse.consume(time_lapse.time_left() / 2)?;
        Ok(())
    }
}

/// Counts ticks, stops after `limit` and optionally detours through simulated time
struct Driver<C> {
    clock: C,
    ticks: AtomicU64,
    limit: Option<u64>,
    switch_after: Option<u64>,
    simulated_ticks: u64,
}

impl<C> Driver<C> {
    fn new(clock: C, limit: Option<u64>) -> Self {
        Self { clock, ticks: AtomicU64::new(0), limit, switch_after: None, simulated_ticks: 0 }
    }
}

impl<C: ClockController> TickListener for Driver<C> {
    fn tick(&self, _time_lapse: &mut TimeLapse) -> Result<(), ListenerError> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if self.limit == Some(tick) {
            self.clock.stop()?;
        }
        Ok(())
    }
}

/// Real-time variant that can also switch modes
struct SwitchingDriver(Driver<RealtimeClock>);

impl TickListener for SwitchingDriver {
    fn tick(&self, time_lapse: &mut TimeLapse) -> Result<(), ListenerError> {
        self.0.tick(time_lapse)?;
        let tick = self.0.ticks.load(Ordering::Relaxed);
        if let Some(after) = self.0.switch_after {
            if tick == after {
                tracing::info!(tick, "Requesting simulated time");
                self.0.clock.switch_to_simulated_time()?;
            } else if tick == after + self.0.simulated_ticks {
                tracing::info!(tick, "Requesting real time");
                self.0.clock.switch_to_real_time()?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct RunReport {
    mode: &'static str,
    final_time: i64,
    time_unit: TimeUnit,
    ticks: u64,
    elapsed_ms: u128,
    tick_log: TickLogStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    jitter: Option<JitterStats>,
    events: Vec<ClockEvent>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize_logging(&cli.log_level, &cli.log_format)?;

    let prometheus = if cli.metrics {
        Some(PrometheusBuilder::new().install_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let config = match &cli.config {
        Some(path) => {
            let path = path.to_str().context("configuration path is not valid UTF-8")?;
            ClockConfig::from_file(path).with_context(|| format!("failed to load {path}"))?
        }
        None => ClockConfig::default(),
    };

    let report = match cli.command {
        Commands::Simulated { tick_length, unit, ticks, work_us } => {
            let mut config = config;
            apply_overrides(&mut config, tick_length, unit);
            run_simulated(config, ticks, Duration::from_micros(work_us))?
        }
        Commands::Realtime {
            tick_length,
            unit,
            duration,
            work_us,
            switch_after,
            simulated_ticks,
            pause_log,
            pinned_core,
            no_pin,
        } => {
            let mut config = config;
            apply_overrides(&mut config, tick_length, unit);
            config.starting_mode = ClockMode::RealTime;
            if let Some(path) = pause_log {
                config.pause_monitor.log_path = Some(path);
            }
            if pinned_core.is_some() {
                config.scheduler.pinned_core = pinned_core;
            }
            if no_pin {
                config.scheduler.enable_cpu_affinity = false;
            }
            let driver = RealtimeDriverSettings { switch_after, simulated_ticks };
            run_realtime(config, Duration::from_secs(duration), Duration::from_micros(work_us), driver)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }
    Ok(())
}

fn apply_overrides(config: &mut ClockConfig, tick_length: Option<i64>, unit: Option<UnitArg>) {
    if let Some(tick_length) = tick_length {
        config.tick_length = tick_length;
    }
    if let Some(unit) = unit {
        config.time_unit = unit.into();
    }
}

fn run_simulated(config: ClockConfig, ticks: u64, work: Duration) -> Result<RunReport> {
    let period = config.tick_duration().context("tick length does not fit a duration")?;
    let clock = ClockBuilder::from_config(config).build_simulated()?;
    let events = clock.events().subscribe();

    let logger = Arc::new(TickLogger::new(period, Arc::new(pause_monitor::NoPauseMonitor)));
    clock.register(logger.clone())?;
    clock.register(Arc::new(SyntheticLoad { work }))?;
    clock.register(Arc::new(Driver::new(clock.clone(), Some(ticks))))?;

    let started = Instant::now();
    if ticks > 0 {
        clock.start()?;
    }
    let elapsed = started.elapsed();

    Ok(RunReport {
        mode: "simulated",
        final_time: clock.current_time(),
        time_unit: clock.time_unit(),
        ticks,
        elapsed_ms: elapsed.as_millis(),
        tick_log: logger.stats(),
        jitter: None,
        events: events.try_iter().collect(),
    })
}

/// Stops a clock once `duration` has passed, unless told the run is already over
struct Stopper {
    done: Sender<()>,
    handle: JoinHandle<()>,
}

impl Stopper {
    fn spawn<C: ClockController + 'static>(clock: C, duration: Duration) -> std::io::Result<Self> {
        let (done, done_rx) = channel::bounded(1);
        let handle = thread::Builder::new().name("clock-stopper".to_string()).spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(duration) {
                if let Err(e) = clock.stop() {
                    tracing::warn!(error = %e, "Failed to stop clock");
                }
            }
        })?;
        Ok(Self { done, handle })
    }

    /// Wake the stopper if it is still waiting and join it
    fn finish(self) {
        let _ = self.done.send(());
        if self.handle.join().is_err() {
            tracing::error!("Stopper thread panicked");
        }
    }
}

struct RealtimeDriverSettings {
    switch_after: Option<u64>,
    simulated_ticks: u64,
}

fn run_realtime(
    config: ClockConfig,
    duration: Duration,
    work: Duration,
    settings: RealtimeDriverSettings,
) -> Result<RunReport> {
    let clock = ClockBuilder::from_config(config).build_realtime()?;
    let events = clock.events().subscribe();

    let logger = Arc::new(TickLogger::new(clock.period(), clock.pause_monitor().clone()));
    clock.register(logger.clone())?;
    clock.register(Arc::new(SyntheticLoad { work }))?;

    let driver = SwitchingDriver(Driver {
        switch_after: settings.switch_after,
        simulated_ticks: settings.simulated_ticks,
        ..Driver::new(clock.clone(), None)
    });
    let driver = Arc::new(driver);
    clock.register(driver.clone())?;

    let stopper = Stopper::spawn(clock.clone(), duration)?;

    let started = Instant::now();
    let result = clock.start();
    let elapsed = started.elapsed();
    stopper.finish();
    result?;

    let jitter = clock.jitter_stats();
    jitter.log();

    Ok(RunReport {
        mode: "realtime",
        final_time: clock.current_time(),
        time_unit: clock.time_unit(),
        ticks: driver.0.ticks.load(Ordering::Relaxed),
        elapsed_ms: elapsed.as_millis(),
        tick_log: logger.stats(),
        jitter: Some(jitter),
        events: events.try_iter().collect(),
    })
}
