//! Per-tick timing measurements recorded in real-time mode

use serde::{Deserialize, Serialize};

/// When a real-time tick started, on both the wall clock and the monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Position of the tick within the current real-time segment, starting at 0
    pub tick_count: u64,

    pub wall_clock_millis: i64,

    /// Nanoseconds on the clock's monotonic epoch
    pub monotonic_nanos: i64,
}

/// Two consecutive ticks of the same real-time segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickInterval {
    start: Timestamp,
    end: Timestamp,
}

impl TickInterval {
    /// `None` unless `end` directly follows `start`
    pub fn new(start: Timestamp, end: Timestamp) -> Option<Self> {
        if end.tick_count != start.tick_count + 1 || end.monotonic_nanos < start.monotonic_nanos {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn inter_arrival_nanos(&self) -> i64 {
        self.end.monotonic_nanos - self.start.monotonic_nanos
    }
}

/// Observed tick period against the nominal one. Reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasuredDeviation {
    /// `inter_arrival - period`; positive means the tick arrived late
    pub deviation_ns: i64,

    /// Offset the fixed-rate schedule must absorb to get back on its ideal timeline
    pub correction_ns: i64,

    pub timestamp: Timestamp,
}

/// Pair every directly consecutive timestamp into an interval
pub fn intervals<'a>(timestamps: impl IntoIterator<Item = &'a Timestamp>) -> Vec<TickInterval> {
    let mut previous: Option<Timestamp> = None;
    let mut result = Vec::new();
    for &timestamp in timestamps {
        if let Some(interval) = previous.and_then(|start| TickInterval::new(start, timestamp)) {
            result.push(interval);
        }
        previous = Some(timestamp);
    }
    result
}

/// Deviations of each interval from `period_ns`.
///
/// Correction is measured against the first timestamp of each real-time segment
/// (`tick_count == 0`); intervals whose segment start is no longer recorded are
/// measured against the earliest retained timestamp of that segment.
pub fn deviations<'a>(
    timestamps: impl IntoIterator<Item = &'a Timestamp>,
    period_ns: i64,
) -> Vec<MeasuredDeviation> {
    let mut anchor: Option<Timestamp> = None;
    let mut previous: Option<Timestamp> = None;
    let mut result = Vec::new();

    for &timestamp in timestamps {
        let continues_segment =
            previous.map_or(false, |p| timestamp.tick_count == p.tick_count + 1);
        if !continues_segment {
            anchor = Some(timestamp);
        }

        if let (Some(start), Some(origin)) = (previous.filter(|_| continues_segment), anchor) {
            let inter_arrival = timestamp.monotonic_nanos - start.monotonic_nanos;
            let ticks_since_origin = (timestamp.tick_count - origin.tick_count) as i64;
            let ideal = origin.monotonic_nanos + ticks_since_origin * period_ns;
            result.push(MeasuredDeviation {
                deviation_ns: inter_arrival - period_ns,
                correction_ns: ideal - timestamp.monotonic_nanos,
                timestamp,
            });
        }
        previous = Some(timestamp);
    }
    result
}
