//! Weekly schedule derived from a user's hour, weekday and timezone fields
//!
//! Field syntax follows the cron hour and day-of-week fields: `*`, single
//! values, `a-b` ranges, `/n` steps and comma lists. Weekdays also accept
//! three-letter names, and both 0 and 7 mean Sunday.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Days, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;

/// Errors from parsing schedule fields
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Invalid {field} value: '{value}'")]
    Invalid { field: &'static str, value: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Unknown timezone: '{0}'")]
    UnknownTimezone(String),
}

/// Search horizon for `next_after`, a year plus a week
const SEARCH_DAYS: u64 = 372;

const WEEKDAY_NAMES: [(&str, u32); 7] = [
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("wed", 3),
    ("thu", 4),
    ("fri", 5),
    ("sat", 6),
];

/// When a user's job fires: at minute 0 of each listed hour on each listed weekday
///
/// Equality is structural, so two differently spelled but equivalent field
/// sets (`1-5` and `mon,tue,wed,thu,fri`) compare equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    timezone: Tz,
    hours: BTreeSet<u32>,
    /// 0 = Sunday
    weekdays: BTreeSet<u32>,
}

impl Schedule {
    /// Parse the three user-facing fields
    pub fn parse(hour: &str, weekday: &str, timezone: &str) -> Result<Self, ScheduleError> {
        debug!(%hour, %weekday, %timezone, "Schedule::parse: called");
        let timezone = timezone.trim();
        if timezone.is_empty() {
            return Err(ScheduleError::Missing("timezone"));
        }
        let tz = timezone
            .parse::<Tz>()
            .map_err(|_| ScheduleError::UnknownTimezone(timezone.to_string()))?;

        let hours = parse_field("hour", hour, 0, 23, &[])?;
        let weekdays = parse_field("weekday", weekday, 0, 7, &WEEKDAY_NAMES)?
            .into_iter()
            .map(|d| d % 7)
            .collect();

        Ok(Self {
            timezone: tz,
            hours,
            weekdays,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Cron-style rendering, for logs and display
    pub fn expression(&self) -> String {
        format!(
            "TZ={} 0 0 {} * * {}",
            self.timezone.name(),
            render_set(&self.hours, 0, 23),
            render_set(&self.weekdays, 0, 6)
        )
    }

    /// First firing strictly after `after`
    ///
    /// Hours that do not exist locally (DST gaps) are skipped for that day;
    /// ambiguous hours fire at the earlier instant. `None` only if nothing
    /// matches within `SEARCH_DAYS`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_timezone(&self.timezone).date_naive();

        for offset in 0..=SEARCH_DAYS {
            let date = start.checked_add_days(Days::new(offset))?;
            if !self.weekdays.contains(&date.weekday().num_days_from_sunday()) {
                continue;
            }
            for &hour in &self.hours {
                let Some(naive) = date.and_hms_opt(hour, 0, 0) else {
                    continue;
                };
                let Some(local) = self.timezone.from_local_datetime(&naive).earliest() else {
                    debug!(%naive, "Schedule::next_after: local time does not exist, skipping");
                    continue;
                };
                let at = local.with_timezone(&Utc);
                if at > after {
                    return Some(at);
                }
            }
        }

        None
    }

    /// The next `count` firings after `after`, in the schedule's timezone
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Tz>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            let Some(next) = self.next_after(cursor) else {
                break;
            };
            times.push(next.with_timezone(&self.timezone));
            cursor = next;
        }
        times
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression())
    }
}

fn parse_value(field: &'static str, raw: &str, names: &[(&str, u32)]) -> Result<u32, ScheduleError> {
    let lower = raw.trim().to_ascii_lowercase();
    if let Some((_, v)) = names.iter().find(|(n, _)| *n == lower) {
        return Ok(*v);
    }
    lower.parse::<u32>().map_err(|_| ScheduleError::Invalid {
        field,
        value: raw.to_string(),
    })
}

fn parse_field(
    field: &'static str,
    raw: &str,
    min: u32,
    max: u32,
    names: &[(&str, u32)],
) -> Result<BTreeSet<u32>, ScheduleError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ScheduleError::Missing(field));
    }

    let mut values = BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step.trim().parse::<u32>().ok().filter(|s| *s > 0).ok_or_else(|| {
                    ScheduleError::Invalid {
                        field,
                        value: part.to_string(),
                    }
                })?;
                (range.trim(), step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(field, a, names)?, parse_value(field, b, names)?)
        } else {
            let v = parse_value(field, range, names)?;
            // a bare value with a step runs to the end of the range
            if step > 1 { (v, max) } else { (v, v) }
        };

        for value in [lo, hi] {
            if value < min || value > max {
                return Err(ScheduleError::OutOfRange { field, value, min, max });
            }
        }
        if lo > hi {
            return Err(ScheduleError::Invalid {
                field,
                value: part.to_string(),
            });
        }

        values.extend((lo..=hi).step_by(step as usize));
    }

    Ok(values)
}

fn render_set(values: &BTreeSet<u32>, min: u32, max: u32) -> String {
    if values.len() as u32 == max - min + 1 {
        return "*".to_string();
    }
    values.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let s = Schedule::parse("9", "1", "UTC").unwrap();
        assert_eq!(s.expression(), "TZ=UTC 0 0 9 * * 1");
    }

    #[test]
    fn test_parse_missing_fields() {
        assert_eq!(Schedule::parse("", "1", "UTC"), Err(ScheduleError::Missing("hour")));
        assert_eq!(Schedule::parse("9", " ", "UTC"), Err(ScheduleError::Missing("weekday")));
        assert_eq!(Schedule::parse("9", "1", ""), Err(ScheduleError::Missing("timezone")));
    }

    #[test]
    fn test_parse_invalid_fields() {
        assert!(matches!(
            Schedule::parse("25", "1", "UTC"),
            Err(ScheduleError::OutOfRange { field: "hour", .. })
        ));
        assert!(matches!(
            Schedule::parse("9", "funday", "UTC"),
            Err(ScheduleError::Invalid { field: "weekday", .. })
        ));
        assert!(matches!(
            Schedule::parse("9", "5-1", "UTC"),
            Err(ScheduleError::Invalid { .. })
        ));
        assert!(matches!(
            Schedule::parse("9", "1", "Mars/Olympus"),
            Err(ScheduleError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_structural_equality() {
        let a = Schedule::parse("9", "1-5", "Europe/Berlin").unwrap();
        let b = Schedule::parse(" 9 ", "mon,tue,wed,thu,fri", "Europe/Berlin").unwrap();
        assert_eq!(a, b);

        let sunday_zero = Schedule::parse("9", "0", "UTC").unwrap();
        let sunday_seven = Schedule::parse("9", "sun", "UTC").unwrap();
        assert_eq!(sunday_zero, Schedule::parse("9", "7", "UTC").unwrap());
        assert_eq!(sunday_zero, sunday_seven);

        let other_tz = Schedule::parse("9", "1-5", "Europe/London").unwrap();
        assert_ne!(a, other_tz);
        let other_hour = Schedule::parse("10", "1-5", "Europe/Berlin").unwrap();
        assert_ne!(a, other_hour);
    }

    #[test]
    fn test_steps_and_wildcards() {
        let s = Schedule::parse("*/6", "*", "UTC").unwrap();
        assert_eq!(s.expression(), "TZ=UTC 0 0 0,6,12,18 * * *");

        let s = Schedule::parse("8-18/5", "sat,sun", "UTC").unwrap();
        assert_eq!(s.expression(), "TZ=UTC 0 0 8,13,18 * * 0,6");
    }

    #[test]
    fn test_next_after_same_week() {
        // 2024-01-01 is a Monday
        let s = Schedule::parse("9", "3", "UTC").unwrap();
        assert_eq!(s.next_after(utc(2024, 1, 1, 12)), Some(utc(2024, 1, 3, 9)));
    }

    #[test]
    fn test_next_after_is_strict() {
        let s = Schedule::parse("9", "1", "UTC").unwrap();
        assert_eq!(s.next_after(utc(2024, 1, 1, 9)), Some(utc(2024, 1, 8, 9)));
    }

    #[test]
    fn test_next_after_respects_timezone() {
        // 09:00 in Kolkata is 03:30 UTC
        let s = Schedule::parse("9", "1", "Asia/Kolkata").unwrap();
        let next = s.next_after(utc(2024, 1, 1, 0)).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 3, 30, 0).unwrap());
    }

    #[test]
    fn test_next_after_skips_dst_gap() {
        // 2024-03-31 (Sunday): Berlin jumps 02:00 -> 03:00
        let s = Schedule::parse("2", "0", "Europe/Berlin").unwrap();
        let next = s.next_after(utc(2024, 3, 30, 12)).unwrap();
        assert_eq!(next.with_timezone(&Tz::Europe__Berlin).day(), 7);
    }

    #[test]
    fn test_next_after_gap_firing_week_after() {
        // Fired 2024-03-24 02:00 CET; next Sunday's 02:00 does not exist
        let s = Schedule::parse("2", "sun", "Europe/Berlin").unwrap();
        let next = s.next_after(utc(2024, 3, 24, 1)).unwrap();
        // 2024-04-07 02:00 CEST
        assert_eq!(next, utc(2024, 4, 7, 0));
    }

    #[test]
    fn test_upcoming_across_dst_gap() {
        let s = Schedule::parse("2", "sun", "Europe/Berlin").unwrap();
        let days: Vec<u32> = s.upcoming(utc(2024, 3, 20, 0), 3).iter().map(|t| t.day()).collect();
        assert_eq!(days, vec![24, 7, 14]);
    }

    #[test]
    fn test_upcoming() {
        let s = Schedule::parse("9,17", "1", "UTC").unwrap();
        let times = s.upcoming(utc(2024, 1, 1, 0), 3);
        assert_eq!(times.len(), 3);
        assert_eq!(times[0].with_timezone(&Utc), utc(2024, 1, 1, 9));
        assert_eq!(times[1].with_timezone(&Utc), utc(2024, 1, 1, 17));
        assert_eq!(times[2].with_timezone(&Utc), utc(2024, 1, 8, 9));
    }
}
