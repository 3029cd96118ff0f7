//! End-to-end tests driving complete clocks through listeners.
//! Real-time tests run on the scheduler thread with short periods.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{
    Clock, ClockBuilder, ClockController, ClockError, ClockEventType, ClockMode, CpuAffinity,
    ListenerError, PinLease, RealtimeClock, RealtimeClockController, SchedulerConfig, TickListener,
    TimeLapse, TimeUnit,
};

type Script = Box<dyn Fn(u64, &mut TimeLapse) -> Result<(), ListenerError> + Send + Sync>;

/// Listener that runs `script` with the 1-based number of the tick it is seeing
struct Scripted {
    ticks: AtomicU64,
    script: Script,
}

impl Scripted {
    fn new(
        script: impl Fn(u64, &mut TimeLapse) -> Result<(), ListenerError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self { ticks: AtomicU64::new(0), script: Box::new(script) })
    }

    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl TickListener for Scripted {
    fn tick(&self, time_lapse: &mut TimeLapse) -> Result<(), ListenerError> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        (self.script)(tick, time_lapse)
    }
}

#[derive(Default)]
struct CountingAffinity {
    pins: AtomicUsize,
    releases: AtomicUsize,
}

impl CpuAffinity for CountingAffinity {
    fn pin_current_thread(&self, core: usize) -> io::Result<PinLease> {
        self.pins.fetch_add(1, Ordering::SeqCst);
        Ok(PinLease::new(core, 0))
    }

    fn release(&self, _lease: &PinLease) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn realtime_clock(tick_ms: i64, mode: ClockMode, affinity: Arc<CountingAffinity>) -> RealtimeClock {
    ClockBuilder::new()
        .tick_length(tick_ms)
        .time_unit(TimeUnit::Milliseconds)
        .starting_mode(mode)
        .scheduler(SchedulerConfig {
            pinned_core: Some(0),
            await_poll_interval_ms: 2,
            ..Default::default()
        })
        .cpu_affinity(affinity)
        .build_realtime()
        .unwrap()
}

fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod simulated_tests {
    use super::*;

    #[test]
    fn test_five_listeners_five_ticks() {
        let clock = ClockBuilder::new().tick_length(100).build_simulated().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut listeners = Vec::new();
        for index in 0..5 {
            let order = order.clone();
            let stopper = clock.clone();
            let listener = Scripted::new(move |tick, _| {
                order.lock().push(index);
                if index == 4 && tick == 5 {
                    stopper.stop()?;
                }
                Ok(())
            });
            clock.register(listener.clone()).unwrap();
            listeners.push(listener);
        }

        clock.start().unwrap();

        assert_eq!(clock.current_time(), 500);
        assert!(listeners.iter().all(|l| l.ticks() == 5));
        let expected: Vec<i32> = (0..5).flat_map(|_| 0..5).collect();
        assert_eq!(*order.lock(), expected);
    }

    #[test]
    fn test_single_step_rejected_while_running() {
        let clock = ClockBuilder::new().tick_length(1).build_simulated().unwrap();
        let rejected = Arc::new(Mutex::new(None));

        let controller = clock.clone();
        let seen = rejected.clone();
        clock
            .register(Scripted::new(move |_, _| {
                *seen.lock() = Some(matches!(controller.tick(), Err(ClockError::ClockAlreadyRunning)));
                controller.stop()?;
                Ok(())
            }))
            .unwrap();

        clock.start().unwrap();
        assert_eq!(*rejected.lock(), Some(true));
        assert_eq!(clock.current_time(), 1);
    }

    #[test]
    fn test_listener_error_stops_clock() {
        let clock = ClockBuilder::new().tick_length(10).build_simulated().unwrap();
        let events = clock.events().subscribe();
        clock
            .register(Scripted::new(|tick, time_lapse| {
                if tick == 3 {
                    time_lapse.consume(time_lapse.time_left() + 1)?;
                }
                Ok(())
            }))
            .unwrap();

        let result = clock.start();

        assert!(matches!(result, Err(ClockError::Listener { time: 20, .. })));
        assert!(!clock.is_ticking());
        assert_eq!(events.try_iter().last().map(|e| e.event_type), Some(ClockEventType::Stopped));
    }
}

#[cfg(test)]
mod realtime_tests {
    use super::*;

    #[test]
    fn test_switch_to_simulated_and_back() {
        let affinity = Arc::new(CountingAffinity::default());
        let clock = realtime_clock(50, ClockMode::RealTime, affinity.clone());
        let events = clock.events().subscribe();
        let modes = Arc::new(Mutex::new(Vec::new()));

        let controller = clock.clone();
        let seen = modes.clone();
        let listener = Scripted::new(move |tick, _| {
            seen.lock().push(controller.clock_mode());
            match tick {
                3 => {
                    controller.switch_to_simulated_time()?;
                    // still real time until the tick boundary
                    assert_eq!(controller.clock_mode(), ClockMode::RealTime);
                }
                103 => controller.switch_to_real_time()?,
                105 => controller.stop()?,
                _ => {}
            }
            Ok(())
        });
        clock.register(listener.clone()).unwrap();

        let started = Instant::now();
        clock.start().unwrap();
        let elapsed = started.elapsed();

        let modes = modes.lock();
        assert_eq!(modes.len(), 105);
        assert!(modes[..3].iter().all(|&m| m == ClockMode::RealTime));
        assert!(modes[3..103].iter().all(|&m| m == ClockMode::Simulated));
        assert!(modes[103..].iter().all(|&m| m == ClockMode::RealTime));

        // 100 simulated ticks would take 5s if paced
        assert!(elapsed < Duration::from_secs(3), "simulated ticks were paced: {elapsed:?}");

        let types: Vec<_> = events.try_iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                ClockEventType::Started,
                ClockEventType::SwitchToSimTime,
                ClockEventType::SwitchToRealTime,
                ClockEventType::Stopped,
            ]
        );

        let counts: Vec<_> = clock.timestamps().iter().map(|t| t.tick_count).collect();
        assert_eq!(counts, vec![0, 1, 2, 0, 1]);
        assert_eq!(clock.tick_intervals().len(), 3);
        assert_eq!(affinity.pins.load(Ordering::SeqCst), 1);
        assert_eq!(affinity.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_real_time_request_wins_within_a_tick() {
        let affinity = Arc::new(CountingAffinity::default());
        let clock = realtime_clock(5, ClockMode::RealTime, affinity);
        let events = clock.events().subscribe();

        let controller = clock.clone();
        clock
            .register(Scripted::new(move |tick, _| {
                match tick {
                    2 => {
                        controller.switch_to_simulated_time()?;
                        controller.switch_to_real_time()?;
                    }
                    4 => controller.stop()?,
                    _ => assert_eq!(controller.clock_mode(), ClockMode::RealTime),
                }
                Ok(())
            }))
            .unwrap();

        clock.start().unwrap();

        let types: Vec<_> = events.try_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![ClockEventType::Started, ClockEventType::Stopped]);
        let counts: Vec<_> = clock.timestamps().iter().map(|t| t.tick_count).collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_switch_to_real_time_applies_at_next_boundary() {
        let affinity = Arc::new(CountingAffinity::default());
        let clock = realtime_clock(5, ClockMode::Simulated, affinity.clone());
        let modes = Arc::new(Mutex::new(Vec::new()));

        let controller = clock.clone();
        let seen = modes.clone();
        clock
            .register(Scripted::new(move |tick, _| {
                seen.lock().push(controller.clock_mode());
                if tick == 5 {
                    controller.switch_to_real_time()?;
                    // a second request is absorbed
                    controller.switch_to_simulated_time()?;
                    assert_eq!(controller.clock_mode(), ClockMode::Simulated);
                }
                if tick == 8 {
                    controller.stop()?;
                }
                Ok(())
            }))
            .unwrap();

        clock.start().unwrap();

        let modes = modes.lock();
        assert!(modes[..5].iter().all(|&m| m == ClockMode::Simulated));
        assert!(modes[5..].iter().all(|&m| m == ClockMode::RealTime));
        assert_eq!(clock.timestamps().len(), 3);
        assert_eq!(clock.current_time(), 40);
        // scheduler thread only created on entering real time
        assert_eq!(affinity.pins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_stop_releases_pin_once() {
        let affinity = Arc::new(CountingAffinity::default());
        let clock = realtime_clock(5, ClockMode::RealTime, affinity.clone());

        let runner = {
            let clock = clock.clone();
            thread::spawn(move || clock.start())
        };
        wait_until(|| clock.current_time() >= 15);
        assert!(clock.is_pinned());

        let barrier = Arc::new(Barrier::new(8));
        let stoppers: Vec<_> = (0..8)
            .map(|_| {
                let clock = clock.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    clock.stop()
                })
            })
            .collect();

        for stopper in stoppers {
            assert!(stopper.join().unwrap().is_ok());
        }
        assert!(runner.join().unwrap().is_ok());

        assert!(!clock.is_ticking());
        assert!(!clock.is_pinned());
        assert_eq!(clock.clock_mode(), ClockMode::Stopped);
        assert_eq!(affinity.pins.load(Ordering::SeqCst), 1);
        assert_eq!(affinity.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_listener_tears_down() {
        let affinity = Arc::new(CountingAffinity::default());
        let clock = realtime_clock(10, ClockMode::RealTime, affinity.clone());
        clock
            .register(Scripted::new(|tick, _| {
                if tick == 3 {
                    return Err("route table corrupted".into());
                }
                Ok(())
            }))
            .unwrap();

        let result = clock.start();

        match result {
            Err(ClockError::Listener { time, source }) => {
                assert_eq!(time, 20);
                assert_eq!(source.to_string(), "route table corrupted");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!clock.is_ticking());
        assert_eq!(clock.clock_mode(), ClockMode::Stopped);
        assert_eq!(affinity.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_is_reported() {
        let clock = realtime_clock(5, ClockMode::RealTime, Arc::new(CountingAffinity::default()));
        clock
            .register(Scripted::new(|tick, _| {
                if tick == 2 {
                    panic!("listener exploded");
                }
                Ok(())
            }))
            .unwrap();

        match clock.start() {
            Err(ClockError::ListenerPanicked { message }) => assert!(message.contains("exploded")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!clock.is_ticking());
    }

    #[test]
    fn test_panic_in_simulated_segment_tears_down() {
        let clock = realtime_clock(5, ClockMode::Simulated, Arc::new(CountingAffinity::default()));
        let events = clock.events().subscribe();
        clock
            .register(Scripted::new(|tick, _| {
                if tick == 2 {
                    panic!("listener exploded");
                }
                Ok(())
            }))
            .unwrap();

        match clock.start() {
            Err(ClockError::ListenerPanicked { message }) => assert!(message.contains("exploded")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!clock.is_ticking());
        assert_eq!(clock.clock_mode(), ClockMode::Stopped);
        assert_eq!(clock.current_time(), 5);

        let types: Vec<_> = events.try_iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![ClockEventType::Started, ClockEventType::Stopped]);
        assert!(matches!(clock.start(), Err(ClockError::IllegalTransition(_))));
    }

    #[test]
    fn test_panic_after_leaving_real_time_releases_the_pin() {
        let affinity = Arc::new(CountingAffinity::default());
        let clock = realtime_clock(5, ClockMode::RealTime, affinity.clone());

        let controller = clock.clone();
        clock
            .register(Scripted::new(move |tick, _| {
                match tick {
                    2 => controller.switch_to_simulated_time()?,
                    4 => panic!("listener exploded in simulated time"),
                    _ => {}
                }
                Ok(())
            }))
            .unwrap();

        assert!(matches!(clock.start(), Err(ClockError::ListenerPanicked { .. })));
        assert!(!clock.is_ticking());
        assert!(!clock.is_pinned());
        assert_eq!(clock.clock_mode(), ClockMode::Stopped);
        assert_eq!(affinity.pins.load(Ordering::SeqCst), 1);
        assert_eq!(affinity.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_step_rejected_while_running() {
        let clock = realtime_clock(5, ClockMode::RealTime, Arc::new(CountingAffinity::default()));
        let rejected = Arc::new(Mutex::new(None));

        let controller = clock.clone();
        let seen = rejected.clone();
        clock
            .register(Scripted::new(move |_, _| {
                *seen.lock() = Some(matches!(controller.tick(), Err(ClockError::SingleStepUnsupported)));
                controller.stop()?;
                Ok(())
            }))
            .unwrap();

        clock.start().unwrap();
        assert_eq!(*rejected.lock(), Some(true));
    }

    #[test]
    fn test_interrupt_is_an_orderly_stop() {
        let clock = realtime_clock(5, ClockMode::RealTime, Arc::new(CountingAffinity::default()));
        let interrupter = clock.clone();
        clock
            .register(Scripted::new(move |tick, _| {
                if tick == 3 {
                    interrupter.interrupt();
                }
                Ok(())
            }))
            .unwrap();

        clock.start().unwrap();
        assert_eq!(clock.current_time(), 15);
        assert_eq!(clock.clock_mode(), ClockMode::Stopped);
    }

    #[test]
    fn test_intervals_are_consecutive_and_paced() {
        let clock = realtime_clock(10, ClockMode::RealTime, Arc::new(CountingAffinity::default()));
        let controller = clock.clone();
        clock
            .register(Scripted::new(move |tick, _| {
                if tick == 10 {
                    controller.stop()?;
                }
                Ok(())
            }))
            .unwrap();

        clock.start().unwrap();

        let intervals = clock.tick_intervals();
        assert_eq!(intervals.len(), 9);
        for interval in &intervals {
            assert_eq!(interval.end().tick_count, interval.start().tick_count + 1);
            assert_eq!(
                interval.inter_arrival_nanos(),
                interval.end().monotonic_nanos - interval.start().monotonic_nanos
            );
            assert!(interval.inter_arrival_nanos() >= 0);
        }

        let span: i64 = intervals.iter().map(|i| i.inter_arrival_nanos()).sum();
        assert!(span >= 9 * 10_000_000 * 8 / 10, "ticks were not paced: {span}ns");

        let jitter = clock.jitter_stats();
        assert_eq!(jitter.samples, 9);
        assert_eq!(jitter.period_ns, 10_000_000);
        assert_eq!(clock.measured_deviations().len(), 9);
    }
}
