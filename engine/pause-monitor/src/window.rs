//! Trailing window of observed pauses

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A single stop-the-world pause, stamped with the monotonic time it was observed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseEvent {
    /// Monotonic nanoseconds (relative to the owning monitor's epoch) at which the pause was seen
    pub occurred_at_ns: u64,

    /// Length of the pause in nanoseconds
    pub duration_ns: u64,
}

/// Ordered, horizon-bounded collection of pauses.
///
/// Entries are kept in `occurred_at_ns` order. Anything older than `horizon_ns`
/// relative to the latest observation is discarded on every insert, so the
/// window never grows beyond what a trailing query can use.
#[derive(Debug, Clone)]
pub struct PauseWindow {
    horizon_ns: u64,
    entries: VecDeque<PauseEvent>,
}

impl PauseWindow {
    pub fn new(horizon_ns: u64) -> Self {
        Self { horizon_ns, entries: VecDeque::new() }
    }

    pub fn horizon_ns(&self) -> u64 {
        self.horizon_ns
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a pause. Out-of-order entries are inserted at their sorted position.
    pub fn record(&mut self, event: PauseEvent) {
        let position = self
            .entries
            .iter()
            .rposition(|existing| existing.occurred_at_ns <= event.occurred_at_ns)
            .map_or(0, |index| index + 1);
        self.entries.insert(position, event);

        let latest = self.entries.back().map_or(event.occurred_at_ns, |e| e.occurred_at_ns);
        self.prune(latest);
    }

    /// Drop every entry that fell out of the horizon as of `now_ns`
    pub fn prune(&mut self, now_ns: u64) {
        let cutoff = now_ns.saturating_sub(self.horizon_ns);
        while let Some(front) = self.entries.front() {
            if front.occurred_at_ns >= cutoff {
                break;
            }
            self.entries.pop_front();
        }
    }

    /// Sum of pause durations observed within `[now_ns - window_ns, now_ns]`.
    ///
    /// Windows longer than the horizon are clamped to it.
    pub fn cumulative_in_last(&self, now_ns: u64, window_ns: u64) -> u64 {
        let cutoff = now_ns.saturating_sub(window_ns.min(self.horizon_ns));
        self.entries
            .iter()
            .rev()
            .skip_while(|e| e.occurred_at_ns > now_ns)
            .take_while(|e| e.occurred_at_ns >= cutoff)
            .map(|e| e.duration_ns)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PauseEvent> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SECOND: u64 = 1_000_000_000;

    fn pause(at: u64, duration: u64) -> PauseEvent {
        PauseEvent { occurred_at_ns: at, duration_ns: duration }
    }

    #[test]
    fn test_cumulative_only_counts_trailing_entries() {
        let mut window = PauseWindow::new(10 * SECOND);
        window.record(pause(SECOND, 5));
        window.record(pause(2 * SECOND, 7));
        window.record(pause(3 * SECOND, 11));

        assert_eq!(window.cumulative_in_last(3 * SECOND, SECOND), 18);
        assert_eq!(window.cumulative_in_last(3 * SECOND, 3 * SECOND), 23);
        assert_eq!(window.cumulative_in_last(3 * SECOND, 0), 11);
    }

    #[test]
    fn test_entries_beyond_horizon_are_pruned() {
        let mut window = PauseWindow::new(10 * SECOND);
        window.record(pause(SECOND, 5));
        window.record(pause(12 * SECOND, 3));

        assert_eq!(window.len(), 1);
        assert_eq!(window.cumulative_in_last(12 * SECOND, 100 * SECOND), 3);
    }

    #[test]
    fn test_out_of_order_insert_keeps_ordering() {
        let mut window = PauseWindow::new(10 * SECOND);
        window.record(pause(3 * SECOND, 1));
        window.record(pause(SECOND, 2));
        window.record(pause(2 * SECOND, 4));

        let stamps: Vec<u64> = window.iter().map(|e| e.occurred_at_ns).collect();
        assert_eq!(stamps, vec![SECOND, 2 * SECOND, 3 * SECOND]);
    }

    #[test]
    fn test_future_entries_are_ignored_by_query() {
        let mut window = PauseWindow::new(10 * SECOND);
        window.record(pause(SECOND, 2));
        window.record(pause(5 * SECOND, 9));

        assert_eq!(window.cumulative_in_last(2 * SECOND, 2 * SECOND), 2);
    }

    #[test]
    fn test_empty_window_reports_zero() {
        let window = PauseWindow::new(SECOND);
        assert!(window.is_empty());
        assert_eq!(window.cumulative_in_last(SECOND, SECOND), 0);
    }

    proptest! {
        #[test]
        fn prop_window_stays_ordered_and_counts_only_trailing_pauses(
            horizon in 1u64..1_000,
            pauses in proptest::collection::vec((0u64..2_000, 1u64..100), 0..40),
            now in 0u64..2_500,
            window_ns in 0u64..1_500,
        ) {
            let mut window = PauseWindow::new(horizon);
            for &(at, duration) in &pauses {
                window.record(pause(at, duration));
            }

            let stamps: Vec<u64> = window.iter().map(|e| e.occurred_at_ns).collect();
            prop_assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));

            let latest = pauses.iter().map(|&(at, _)| at).max().unwrap_or(0);
            let retained: Vec<(u64, u64)> = pauses
                .iter()
                .copied()
                .filter(|&(at, _)| at >= latest.saturating_sub(horizon))
                .collect();
            prop_assert_eq!(window.len(), retained.len());

            let cutoff = now.saturating_sub(window_ns.min(horizon));
            let expected: u64 = retained
                .iter()
                .filter(|&&(at, _)| at >= cutoff && at <= now)
                .map(|&(_, duration)| duration)
                .sum();
            prop_assert_eq!(window.cumulative_in_last(now, window_ns), expected);
        }
    }
}
