//! Pause log line parsing
//!
//! Two line shapes are recognised:
//!
//! ```text
//! [12.345s][info][gc] GC(7) Pause Young (Normal) (G1 Evacuation Pause) 24M->4M(256M) 3.456ms
//! Total time for which application threads were stopped: 0.0012345 seconds, Stopping threads took: 0.0000123 seconds
//! ```
//!
//! Every other line (heap summaries, concurrent phases, ...) is ignored.

use std::time::Duration;

const SAFEPOINT_MARKER: &str = "Total time for which application threads were stopped:";
const PAUSE_MARKER: &str = "Pause";

/// Extract the pause duration carried by a single log line, if any
pub fn parse_pause_line(line: &str) -> Option<Duration> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.split_once(SAFEPOINT_MARKER).map(|(_, rest)| rest) {
        return parse_seconds(rest);
    }

    if line.contains(PAUSE_MARKER) {
        return parse_trailing_millis(line);
    }

    None
}

/// `" 0.0012345 seconds, Stopping ..."` -> 1.2345ms
fn parse_seconds(rest: &str) -> Option<Duration> {
    let value = rest.split_whitespace().next()?;
    let seconds: f64 = value.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

/// The last whitespace-separated token of a unified log pause line is `<float>ms`
fn parse_trailing_millis(line: &str) -> Option<Duration> {
    let token = line.split_whitespace().last()?;
    let millis: f64 = token.strip_suffix("ms")?.parse().ok()?;
    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(millis / 1_000.0))
}
