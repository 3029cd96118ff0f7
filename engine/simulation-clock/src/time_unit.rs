//! Unit of simulated time

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unit in which `current_time` and `tick_length` are expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    #[default]
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl TimeUnit {
    /// Nanoseconds in one unit
    pub const fn nanos_per_unit(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60 * 1_000_000_000,
            TimeUnit::Hours => 3_600 * 1_000_000_000,
        }
    }

    /// Convert `amount` of this unit to nanoseconds. `None` for negative or overflowing amounts.
    pub fn to_nanos(self, amount: i64) -> Option<u64> {
        u64::try_from(amount).ok()?.checked_mul(self.nanos_per_unit())
    }

    pub fn to_duration(self, amount: i64) -> Option<Duration> {
        self.to_nanos(amount).map(Duration::from_nanos)
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
