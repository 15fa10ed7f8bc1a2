//! Daily active-hours window for non-forced alerts.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Local time-of-day window during which alerts may be delivered.
///
/// Outside `[start, end)` is quiet time. `start > end` wraps midnight
/// (e.g. 22:00-06:00 for a night shift); `start == end` means always active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl AlertWindow {
    pub const fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse a pair of `HH:MM` strings. `None` if either is malformed.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: parse_time_of_day(start)?,
            end: parse_time_of_day(end)?,
        })
    }

    /// True if alerts may be delivered at local time `t`.
    pub fn is_active(&self, t: NaiveTime) -> bool {
        use std::cmp::Ordering;
        match self.start.cmp(&self.end) {
            Ordering::Less => t >= self.start && t < self.end,
            Ordering::Greater => t >= self.start || t < self.end,
            Ordering::Equal => true,
        }
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn daytime_window() {
        let w = AlertWindow::parse("08:00", "22:00").unwrap();
        assert!(w.is_active(hm(10, 0)));
        assert!(w.is_active(hm(8, 0)));
        assert!(!w.is_active(hm(22, 0)));
        assert!(!w.is_active(hm(23, 0)));
        assert!(!w.is_active(hm(3, 30)));
    }

    #[test]
    fn window_wrapping_midnight() {
        let w = AlertWindow::parse("22:00", "06:00").unwrap();
        assert!(w.is_active(hm(23, 0)));
        assert!(w.is_active(hm(2, 0)));
        assert!(!w.is_active(hm(12, 0)));
    }

    #[test]
    fn equal_bounds_never_quiet() {
        let w = AlertWindow::parse("00:00", "00:00").unwrap();
        assert!(w.is_active(hm(4, 0)));
    }

    #[test]
    fn malformed_times_do_not_parse() {
        assert!(AlertWindow::parse("8am", "22:00").is_none());
        assert!(AlertWindow::parse("08:00", "25:00").is_none());
        assert_eq!(parse_time_of_day(" 07:30:15 "), NaiveTime::from_hms_opt(7, 30, 15));
    }
}
