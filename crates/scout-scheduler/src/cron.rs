//! Cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds, UTC)
//! Field syntax: *, N, A-B, A,B,C, */N, A-B/N
//! Example: "0 8 * * 1-5" = weekdays at 8:00
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either field matches (classic cron semantics).

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// How far ahead `next_after` searches before giving up (covers Feb 29 on leap years).
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronExpr {
    /// The normalized expression (fields joined by single spaces).
    pub expression: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse a cron expression.
    pub fn parse(expression: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ParseError::FieldCount(parts.len()));
        }

        Ok(Self {
            expression: parts.join(" "),
            minutes: parse_field(parts[0], 0, 59)?,
            hours: parse_field(parts[1], 0, 23)?,
            days_of_month: parse_field(parts[2], 1, 31)?,
            months: parse_field(parts[3], 1, 12)?,
            days_of_week: parse_field(parts[4], 0, 6)?,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    /// Whether `dt` (truncated to the minute) matches this expression.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.months.contains(&dt.month())
            && self.day_matches(dt.date_naive())
    }

    /// The first matching minute strictly after `after`.
    /// `None` if nothing matches within the search horizon (e.g. "0 0 30 2 *").
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let limit = after + Duration::days(SEARCH_HORIZON_DAYS);
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);

        while t <= limit {
            if !self.months.contains(&t.month()) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                t = start_of_next_day(t)?;
                continue;
            }
            if !self.hours.contains(&t.hour()) {
                t = start_of_hour(t)? + Duration::hours(1);
                continue;
            }
            match self.minutes.range(t.minute()..).next() {
                Some(&m) => return t.with_minute(m),
                None => t = start_of_hour(t)? + Duration::hours(1),
            }
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(&date.day());
        let dow = self
            .days_of_week
            .contains(&date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

/// Parse one cron field into the set of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>, ParseError> {
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let invalid = |reason: String| ParseError::InvalidCronField {
            token: part.to_string(),
            reason,
        };

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("step '{step}' is not a number")))?;
                if step == 0 {
                    return Err(invalid("step must be at least 1".into()));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let a: u32 = a
                .parse()
                .map_err(|_| invalid(format!("range start '{a}' is not a number")))?;
            let b: u32 = b
                .parse()
                .map_err(|_| invalid(format!("range end '{b}' is not a number")))?;
            if a > b {
                return Err(invalid(format!("range {a}-{b} is reversed")));
            }
            (a, b)
        } else {
            let n: u32 = range
                .parse()
                .map_err(|_| invalid(format!("'{range}' is not a number")))?;
            (n, n)
        };

        if start < min || end > max {
            return Err(invalid(format!("value out of range {min}-{max}")));
        }

        values.extend((start..=end).step_by(step as usize));
    }

    Ok(values)
}

fn truncate_to_minute(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_second(0)?.with_nanosecond(0)
}

fn start_of_hour(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    truncate_to_minute(t)?.with_minute(0)
}

fn start_of_next_day(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let next = t.date_naive().succ_opt()?;
    Some(next.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_hour() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let next = expr.next_after(at(2026, 2, 22, 10, 30)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 11, 0));
    }

    #[test]
    fn test_specific_time() {
        let expr = CronExpr::parse("0 8 * * *").unwrap();
        assert_eq!(expr.next_after(at(2026, 2, 22, 7, 0)).unwrap(), at(2026, 2, 22, 8, 0));
        // Exactly on the match moves to the next day
        assert_eq!(expr.next_after(at(2026, 2, 22, 8, 0)).unwrap(), at(2026, 2, 23, 8, 0));
    }

    #[test]
    fn test_every_15_minutes() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert_eq!(expr.next_after(at(2026, 2, 22, 10, 2)).unwrap(), at(2026, 2, 22, 10, 15));
        assert_eq!(expr.next_after(at(2026, 2, 22, 10, 50)).unwrap(), at(2026, 2, 22, 11, 0));
    }

    #[test]
    fn test_seconds_are_ignored() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 45).unwrap();
        assert_eq!(expr.next_after(after).unwrap(), at(2026, 2, 22, 10, 3));
    }

    #[test]
    fn test_ranges_and_lists() {
        let expr = CronExpr::parse("0,30 9-17 * * 1-5").unwrap();
        // 2026-02-21 is a Saturday → next is Monday 09:00
        assert_eq!(expr.next_after(at(2026, 2, 21, 12, 0)).unwrap(), at(2026, 2, 23, 9, 0));
        assert_eq!(expr.next_after(at(2026, 2, 23, 9, 0)).unwrap(), at(2026, 2, 23, 9, 30));
        assert_eq!(expr.next_after(at(2026, 2, 23, 17, 30)).unwrap(), at(2026, 2, 24, 9, 0));
    }

    #[test]
    fn test_month_and_year_rollover() {
        let expr = CronExpr::parse("0 0 1 1 *").unwrap();
        assert_eq!(expr.next_after(at(2026, 3, 5, 0, 0)).unwrap(), at(2027, 1, 1, 0, 0));
    }

    #[test]
    fn test_dom_or_dow_when_both_restricted() {
        // 13th of the month OR any Friday
        let expr = CronExpr::parse("0 0 13 * 5").unwrap();
        // 2026-02-22 is a Sunday; next Friday is 2026-02-27, next 13th is 2026-03-13
        assert_eq!(expr.next_after(at(2026, 2, 22, 0, 0)).unwrap(), at(2026, 2, 27, 0, 0));
    }

    #[test]
    fn test_range_with_step() {
        let expr = CronExpr::parse("10-40/10 * * * *").unwrap();
        assert!(expr.matches(&at(2026, 1, 1, 0, 30)));
        assert!(!expr.matches(&at(2026, 1, 1, 0, 50)));
    }

    #[test]
    fn test_impossible_date_has_no_next() {
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        assert!(expr.next_after(at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_invalid_expressions() {
        assert_eq!(CronExpr::parse("bad"), Err(ParseError::FieldCount(1)));
        assert_eq!(CronExpr::parse("* * * *"), Err(ParseError::FieldCount(4)));
        assert!(matches!(
            CronExpr::parse("60 * * * *"),
            Err(ParseError::InvalidCronField { ref token, .. }) if token == "60"
        ));
        assert!(matches!(
            CronExpr::parse("* * * * 7"),
            Err(ParseError::InvalidCronField { ref token, .. }) if token == "7"
        ));
        assert!(matches!(
            CronExpr::parse("*/0 * * * *"),
            Err(ParseError::InvalidCronField { ref token, .. }) if token == "*/0"
        ));
        assert!(matches!(
            CronExpr::parse("5-1 * * * *"),
            Err(ParseError::InvalidCronField { .. })
        ));
        assert!(matches!(
            CronExpr::parse("1,x * * * *"),
            Err(ParseError::InvalidCronField { ref token, .. }) if token == "x"
        ));
    }

    #[test]
    fn test_expression_is_normalized() {
        let expr = CronExpr::parse("  0   0 * *  * ").unwrap();
        assert_eq!(expr.expression, "0 0 * * *");
    }
}
