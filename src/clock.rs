//! Time source. Times are seconds since the Unix epoch as `f64`, which keeps
//! the scheduling arithmetic (deadlines, fades, debounces) simple.

use chrono::{Local, TimeZone, Timelike};

pub trait Clock {
    fn now(&self) -> f64;

    /// Local wall-clock hour (0..24) at `at`.
    fn hour_of_day(&self, at: f64) -> u32;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn hour_of_day(&self, at: f64) -> u32 {
        Local
            .timestamp_opt(at.floor() as i64, 0)
            .single()
            .map(|t| t.hour())
            .unwrap_or(12)
    }
}

/// Whether `hour` falls inside the `[start, end)` window, wrapping past midnight
/// when `start > end`.
pub fn in_window(hour: u32, start: u32, end: u32) -> bool {
    if start == end {
        false
    } else if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// `YYYY-MM-DD HH:MM:SS` in local time.
pub fn stamp(at: f64) -> String {
    Local
        .timestamp_opt(at.floor() as i64, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| format!("{}", at as i64))
}

/// Manually advanced clock. The hour is derived from the time with a fixed
/// UTC offset so tests don't depend on the host timezone.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    pub t: std::cell::Cell<f64>,
}

#[cfg(test)]
impl ManualClock {
    /// Clock starting at the given hour of day 2024-01-01 (UTC).
    pub fn at_hour(hour: u32) -> Self {
        ManualClock {
            t: std::cell::Cell::new(1_704_067_200.0 + hour as f64 * 3600.0),
        }
    }

    pub fn advance(&self, secs: f64) {
        self.t.set(self.t.get() + secs);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.t.get()
    }

    fn hour_of_day(&self, at: f64) -> u32 {
        ((at.rem_euclid(86_400.0)) / 3600.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_plain() {
        assert!(in_window(0, 0, 6));
        assert!(in_window(5, 0, 6));
        assert!(!in_window(6, 0, 6));
        assert!(!in_window(23, 0, 6));
    }

    #[test]
    fn window_wraps_midnight() {
        assert!(in_window(23, 22, 6));
        assert!(in_window(2, 22, 6));
        assert!(!in_window(12, 22, 6));
    }

    #[test]
    fn window_empty() {
        assert!(!in_window(3, 4, 4));
    }

    #[test]
    fn manual_clock_hours() {
        let c = ManualClock::at_hour(3);
        assert_eq!(c.hour_of_day(c.now()), 3);
        c.advance(3.0 * 3600.0);
        assert_eq!(c.hour_of_day(c.now()), 6);
    }
}
