//! Cron expression parsing and next-fire computation.
//!
//! Grammar per field: `*`, an integer, a range `a-b`, a step `X/n` (where
//! `X` is `*`, an integer, or a range), or a comma-separated combination.
//! Five whitespace-separated fields give minute resolution (seconds pinned
//! to 0); six fields add a leading seconds field. Field bounds: seconds
//! 0-59, minutes 0-59, hours 0-23, day-of-month 1-31, month 1-12,
//! day-of-week 0-6 (Sunday = 0).
//!
//! Invalid expressions parse to `None`, which disables the owning job.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;

/// One parsed field as a permitted-value bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    fn only(value: u32) -> Self {
        FieldSet(1 << value)
    }

    fn is_only(&self, value: u32) -> bool {
        self.0 == 1 << value
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

impl CronExpression {
    /// Parses a five- or six-field expression. Returns `None` on any
    /// malformed field.
    pub fn parse(expression: &str) -> Option<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (seconds, rest): (FieldSet, &[&str]) = match fields.len() {
            5 => (FieldSet::only(0), &fields[..]),
            6 => (parse_field(fields[0], 0, 59)?, &fields[1..]),
            _ => return None,
        };

        Some(CronExpression {
            seconds,
            minutes: parse_field(rest[0], 0, 59)?,
            hours: parse_field(rest[1], 0, 23)?,
            day_of_month: parse_field(rest[2], 1, 31)?,
            month: parse_field(rest[3], 1, 12)?,
            day_of_week: parse_field(rest[4], 0, 6)?,
        })
    }

    /// Computes the next fire strictly after `from`, searching up to 366
    /// days ahead. Matching happens in `timezone`'s local parts when one is
    /// given, else in UTC.
    pub fn next_fire(&self, from: DateTime<Utc>, timezone: Option<Tz>) -> Option<DateTime<Utc>> {
        // Minute resolution when seconds are pinned to zero.
        let (step, mut candidate) = if self.seconds.is_only(0) {
            let truncated = from
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(from);
            (ChronoDuration::minutes(1), truncated + ChronoDuration::minutes(1))
        } else {
            let truncated = from.with_nanosecond(0).unwrap_or(from);
            (ChronoDuration::seconds(1), truncated + ChronoDuration::seconds(1))
        };

        let bound = from + ChronoDuration::days(366);
        while candidate <= bound {
            if self.matches(candidate, timezone) {
                return Some(candidate);
            }
            candidate += step;
        }
        None
    }

    fn matches(&self, at: DateTime<Utc>, timezone: Option<Tz>) -> bool {
        let (second, minute, hour, dom, month, dow) = match timezone {
            Some(tz) => {
                let local = at.with_timezone(&tz);
                (
                    local.second(),
                    local.minute(),
                    local.hour(),
                    local.day(),
                    local.month(),
                    local.weekday().num_days_from_sunday(),
                )
            }
            None => (
                at.second(),
                at.minute(),
                at.hour(),
                at.day(),
                at.month(),
                at.weekday().num_days_from_sunday(),
            ),
        };

        self.seconds.contains(second)
            && self.minutes.contains(minute)
            && self.hours.contains(hour)
            && self.day_of_month.contains(dom)
            && self.month.contains(month)
            && self.day_of_week.contains(dow)
    }
}

fn parse_field(field: &str, min: u32, max: u32) -> Option<FieldSet> {
    let mut mask = 0u64;
    for part in field.split(',') {
        mask |= parse_part(part, min, max)?;
    }
    (mask != 0).then_some(FieldSet(mask))
}

fn parse_part(part: &str, min: u32, max: u32) -> Option<u64> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => {
            let step: u32 = step.parse().ok()?;
            if step == 0 {
                return None;
            }
            (base, step)
        }
        None => (part, 1),
    };

    let (start, end) = if base == "*" {
        (min, max)
    } else if let Some((a, b)) = base.split_once('-') {
        let a: u32 = a.parse().ok()?;
        let b: u32 = b.parse().ok()?;
        if a > b {
            return None;
        }
        (a, b)
    } else {
        let value: u32 = base.parse().ok()?;
        // A bare value with a step ranges up to the field maximum.
        if step > 1 {
            (value, max)
        } else {
            (value, value)
        }
    };

    if start < min || end > max {
        return None;
    }

    let mut mask = 0u64;
    let mut value = start;
    while value <= end {
        mask |= 1 << value;
        value += step;
    }
    Some(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn six_field_hourly_next_fire() {
        let cron = CronExpression::parse("0 0 * * * *").unwrap();
        let next = cron.next_fire(utc(2024, 1, 1, 0, 30, 0), None).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 1, 0, 0));
    }

    #[test]
    fn five_field_pins_seconds_to_zero() {
        let cron = CronExpression::parse("*/15 * * * *").unwrap();
        let next = cron.next_fire(utc(2024, 1, 1, 0, 7, 30), None).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 0, 15, 0));
    }

    #[test]
    fn seconds_resolution_when_seconds_field_set() {
        let cron = CronExpression::parse("*/10 * * * * *").unwrap();
        let next = cron.next_fire(utc(2024, 1, 1, 0, 0, 3), None).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 0, 0, 10));
    }

    #[test]
    fn lists_ranges_and_steps() {
        let cron = CronExpression::parse("0 0,30 9-17 * * 1-5").unwrap();
        // Monday 2024-01-01 08:45 -> 09:00.
        let next = cron.next_fire(utc(2024, 1, 1, 8, 45, 0), None).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 9, 0, 0));
        // Friday 17:30 is the last slot of the week; from 17:31 the next is
        // Monday 09:00.
        let next = cron.next_fire(utc(2024, 1, 5, 17, 31, 0), None).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 9, 0, 0));
    }

    #[test]
    fn day_of_week_sunday_is_zero() {
        let cron = CronExpression::parse("0 0 0 * * 0").unwrap();
        // 2024-01-01 is a Monday; the next Sunday midnight is 2024-01-07.
        let next = cron.next_fire(utc(2024, 1, 1, 0, 0, 0), None).unwrap();
        assert_eq!(next, utc(2024, 1, 7, 0, 0, 0));
    }

    #[test]
    fn timezone_shifts_matching() {
        let cron = CronExpression::parse("0 0 12 * * *").unwrap();
        // Noon in UTC+2 (Europe/Helsinki winter) is 10:00 UTC.
        let next = cron
            .next_fire(utc(2024, 1, 1, 0, 0, 0), Some(chrono_tz::Europe::Helsinki))
            .unwrap();
        assert_eq!(next, utc(2024, 1, 1, 10, 0, 0));
    }

    #[test]
    fn invalid_expressions_yield_none() {
        assert!(CronExpression::parse("").is_none());
        assert!(CronExpression::parse("* * *").is_none());
        assert!(CronExpression::parse("61 * * * * *").is_none());
        assert!(CronExpression::parse("a * * * *").is_none());
        assert!(CronExpression::parse("*/0 * * * *").is_none());
        assert!(CronExpression::parse("5-2 * * * *").is_none());
        assert!(CronExpression::parse("0 0 * * 9").is_none());
    }

    #[test]
    fn unsatisfiable_expression_gives_up_within_bound() {
        // February 30th never exists.
        let cron = CronExpression::parse("0 0 0 30 2 *").unwrap();
        assert!(cron.next_fire(utc(2024, 1, 1, 0, 0, 0), None).is_none());
    }
}
