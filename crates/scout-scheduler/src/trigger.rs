//! Schedule spec parser.
//!
//! Turns a schedule string into a [`Trigger`] exactly once, at the boundary.
//! Everything downstream (arming, persistence, restore) works on the parsed
//! descriptor, never on the raw string.
//!
//! Accepted formats:
//! - `cron:<min> <hour> <dom> <month> <dow>`
//! - `every <N><unit>`  (recurring interval)
//! - `at:<ISO-8601>`    (one-off; naive datetimes are UTC)
//! - `in:<N><unit>`     (one-off delay; `in <N><unit>` also accepted)
//!
//! Units: `s`, `m`, `h`, `d`.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron::CronExpr;
use crate::error::ParseError;
use crate::tasks::ScheduleKind;

/// Naive datetime layouts accepted after `at:`, tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Longest accepted period, in seconds (~100 years).
const MAX_PERIOD_SECS: i64 = 100 * 366 * 86_400;

/// Unit suffix of `every` / `in:` specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl TimeUnit {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(Self::Seconds),
            "m" => Some(Self::Minutes),
            "h" => Some(Self::Hours),
            "d" => Some(Self::Days),
            _ => None,
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Seconds => "second",
            Self::Minutes => "minute",
            Self::Hours => "hour",
            Self::Days => "day",
        }
    }
}

/// A parsed schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire once at an absolute instant.
    Once { at: DateTime<Utc> },
    /// Fire once, `amount` units after scheduling.
    Delay { amount: u64, unit: TimeUnit },
    /// Fire every `amount` units, first fire one period after scheduling.
    Interval { amount: u64, unit: TimeUnit },
    /// Fire on every cron match.
    Cron { expr: CronExpr },
}

impl Trigger {
    /// Parse a schedule string. Pure: no clock access.
    pub fn parse(spec: &str) -> Result<Self, ParseError> {
        let spec = spec.trim();

        if let Some(rest) = spec.strip_prefix("cron:") {
            return Ok(Self::Cron {
                expr: CronExpr::parse(rest.trim())?,
            });
        }
        if let Some(rest) = spec.strip_prefix("every ") {
            let (amount, unit) = parse_amount_unit(rest.trim())?;
            return Ok(Self::Interval { amount, unit });
        }
        if let Some(rest) = spec.strip_prefix("at:") {
            return Ok(Self::Once {
                at: parse_datetime(rest.trim())?,
            });
        }
        if let Some(rest) = spec
            .strip_prefix("in:")
            .or_else(|| spec.strip_prefix("in "))
        {
            let (amount, unit) = parse_amount_unit(rest.trim())?;
            return Ok(Self::Delay { amount, unit });
        }

        Err(ParseError::UnknownFormat(spec.to_string()))
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            Self::Once { .. } => ScheduleKind::OneOff,
            Self::Delay { .. } => ScheduleKind::Delay,
            Self::Interval { .. } => ScheduleKind::Interval,
            Self::Cron { .. } => ScheduleKind::Cron,
        }
    }

    /// Whether the trigger keeps firing after its first fire.
    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::Interval { .. } | Self::Cron { .. })
    }

    pub fn human_readable(&self) -> String {
        match self {
            Self::Once { at } => format!("Once at {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            Self::Delay { amount, unit } => format!("In {amount} {}(s)", unit.name()),
            Self::Interval { amount, unit } => format!("Every {amount} {}(s)", unit.name()),
            Self::Cron { expr } => format!("Cron: {}", expr.expression),
        }
    }

    /// Period of an interval or delay trigger.
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Delay { amount, unit } | Self::Interval { amount, unit } => {
                Some(Duration::seconds(*amount as i64 * unit.seconds()))
            }
            _ => None,
        }
    }

    /// First fire time when armed at `now`.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Once { at } => Some(*at),
            Self::Delay { .. } | Self::Interval { .. } => {
                now.checked_add_signed(self.period()?)
            }
            Self::Cron { expr } => expr.next_after(now),
        }
    }

    /// Next fire time after the intended fire time `prior`, observed at `now`.
    ///
    /// Recurrence is anchored on `prior`, not on when the fire was observed.
    /// Missed periods are coalesced: the result is always strictly after `now`.
    /// One-off triggers return `None`.
    pub fn next_after(&self, prior: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Once { .. } | Self::Delay { .. } => None,
            Self::Interval { .. } => {
                let period_ms = self.period()?.num_milliseconds();
                if period_ms <= 0 {
                    return None;
                }
                let elapsed_ms = (now - prior).num_milliseconds();
                let periods = if elapsed_ms < 0 {
                    1
                } else {
                    elapsed_ms / period_ms + 1
                };
                prior.checked_add_signed(Duration::milliseconds(periods.checked_mul(period_ms)?))
            }
            Self::Cron { expr } => expr.next_after(prior.max(now)),
        }
    }
}

/// Parse `<N><unit>`, e.g. `30m`.
fn parse_amount_unit(s: &str) -> Result<(u64, TimeUnit), ParseError> {
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);

    if digits.is_empty() {
        return Err(ParseError::InvalidValue(s.to_string()));
    }
    let amount: u64 = digits
        .parse()
        .map_err(|_| ParseError::InvalidValue(s.to_string()))?;
    if amount < 1 {
        return Err(ParseError::InvalidValue(s.to_string()));
    }

    let unit =
        TimeUnit::from_suffix(suffix).ok_or_else(|| ParseError::UnknownUnit(suffix.to_string()))?;

    let too_long = i64::try_from(amount)
        .ok()
        .and_then(|a| a.checked_mul(unit.seconds()))
        .is_none_or(|secs| secs > MAX_PERIOD_SECS);
    if too_long {
        return Err(ParseError::InvalidValue(s.to_string()));
    }

    Ok((amount, unit))
}

/// RFC 3339 with an offset, or a naive datetime taken as UTC.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ParseError::InvalidDateTime(s.to_string()))
}
