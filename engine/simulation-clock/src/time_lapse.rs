//! Per-tick consumable time budget

use std::fmt;

use crate::error::TimeLapseError;
use crate::TimeUnit;

/// The interval `[start, end)` of the current tick, together with how much of it
/// listeners have not yet consumed.
///
/// One instance lives inside each clock and is reset at the top of every tick.
/// Listeners receive it by `&mut` during `tick` and by `&` during `after_tick`,
/// at which point it has already been fully consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLapse {
    start: i64,
    end: i64,
    time_left: i64,
    time_unit: TimeUnit,
}

impl TimeLapse {
    pub(crate) fn new(time_unit: TimeUnit) -> Self {
        Self { start: 0, end: 0, time_left: 0, time_unit }
    }

    pub(crate) fn reset(&mut self, start: i64, end: i64) {
        debug_assert!(start < end, "time lapse must cover a non-empty interval");
        self.start = start;
        self.end = end;
        self.time_left = end - start;
    }

    /// Consume `amount` of the remaining budget
    pub fn consume(&mut self, amount: i64) -> Result<(), TimeLapseError> {
        if amount < 0 || amount > self.time_left {
            return Err(TimeLapseError::InvalidAmount { amount, time_left: self.time_left });
        }
        self.time_left -= amount;
        Ok(())
    }

    /// Consume everything that is left
    pub fn consume_all(&mut self) {
        self.time_left = 0;
    }

    pub fn has_time_left(&self) -> bool {
        self.time_left > 0
    }

    pub fn time_left(&self) -> i64 {
        self.time_left
    }

    pub fn time_consumed(&self) -> i64 {
        self.tick_length() - self.time_left
    }

    /// Whether `time` falls inside `[start, end)`
    pub fn is_in(&self, time: i64) -> bool {
        time >= self.start && time < self.end
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn tick_length(&self) -> i64 {
        self.end - self.start
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }
}

impl fmt::Display for TimeLapse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}){} left={}", self.start, self.end, self.time_unit, self.time_left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lapse(start: i64, end: i64) -> TimeLapse {
        let mut lapse = TimeLapse::new(TimeUnit::Milliseconds);
        lapse.reset(start, end);
        lapse
    }

    #[test]
    fn test_reset_restores_full_budget() {
        let mut tl = lapse(0, 100);
        tl.consume(40).unwrap();
        tl.reset(100, 200);

        assert_eq!(tl.start(), 100);
        assert_eq!(tl.end(), 200);
        assert_eq!(tl.time_left(), 100);
        assert_eq!(tl.time_consumed(), 0);
    }

    #[test]
    fn test_consume() {
        let mut tl = lapse(0, 100);
        tl.consume(30).unwrap();
        tl.consume(70).unwrap();

        assert!(!tl.has_time_left());
        assert_eq!(tl.time_consumed(), 100);
    }

    #[test]
    fn test_consume_rejects_negative_and_excess() {
        let mut tl = lapse(0, 100);
        assert_eq!(
            tl.consume(-1),
            Err(TimeLapseError::InvalidAmount { amount: -1, time_left: 100 })
        );
        tl.consume(60).unwrap();
        assert_eq!(
            tl.consume(41),
            Err(TimeLapseError::InvalidAmount { amount: 41, time_left: 40 })
        );
        assert_eq!(tl.time_left(), 40);
    }

    #[test]
    fn test_consume_zero_is_allowed() {
        let mut tl = lapse(0, 10);
        tl.consume(0).unwrap();
        assert_eq!(tl.time_left(), 10);
    }

    #[test]
    fn test_consume_all() {
        let mut tl = lapse(500, 600);
        tl.consume_all();
        assert!(!tl.has_time_left());
        assert_eq!(tl.time_consumed(), 100);
        assert!(tl.consume(1).is_err());
        assert!(tl.consume(0).is_ok());
    }

    #[test]
    fn test_is_in_is_half_open() {
        let tl = lapse(100, 200);
        assert!(!tl.is_in(99));
        assert!(tl.is_in(100));
        assert!(tl.is_in(199));
        assert!(!tl.is_in(200));
    }
}
