//! Cron expressions evaluated in UTC.
//!
//! Accepts 5-field (`min hour dom month dow`) and 6-field (leading seconds)
//! expressions, the `@hourly`-style descriptors, and `@every <n><s|m|h>`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

use common::{Error, Result};

/// Search horizon for the next fire time. Expressions such as `0 0 30 2 *`
/// never fire and yield `None` once this is exhausted.
const MAX_YEARS_AHEAD: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    expr: String,
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Every(Duration),
    Fields(Fields),
}

#[derive(Debug, Clone, PartialEq)]
struct Fields {
    seconds: u64,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let invalid = |reason: String| Error::Config(format!("invalid cron expression '{trimmed}': {reason}"));

        let kind = if let Some(rest) = trimmed.strip_prefix("@every") {
            Kind::Every(parse_every(rest.trim()).map_err(invalid)?)
        } else if trimmed.starts_with('@') {
            let fields = match trimmed.to_ascii_lowercase().as_str() {
                "@yearly" | "@annually" => "0 0 0 1 1 *",
                "@monthly" => "0 0 0 1 * *",
                "@weekly" => "0 0 0 * * 0",
                "@daily" | "@midnight" => "0 0 0 * * *",
                "@hourly" => "0 0 * * * *",
                other => return Err(invalid(format!("unknown descriptor {other}"))),
            };
            Kind::Fields(parse_fields(fields).map_err(invalid)?)
        } else {
            Kind::Fields(parse_fields(trimmed).map_err(invalid)?)
        };

        Ok(Self { expr: trimmed.to_string(), kind })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`, or `None` if the expression
    /// never fires within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            Kind::Every(every) => Some(after + *every),
            Kind::Fields(fields) => fields.next_after(after.naive_utc()).map(|t| t.and_utc()),
        }
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn parse_every(spec: &str) -> std::result::Result<Duration, String> {
    let split = spec
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in '@every {spec}'"))?;
    let (count, unit) = spec.split_at(split);
    let count: i64 = count
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("bad interval '{spec}'"))?;
    match unit {
        "s" => Ok(Duration::seconds(count)),
        "m" => Ok(Duration::minutes(count)),
        "h" => Ok(Duration::hours(count)),
        other => Err(format!("unsupported interval unit '{other}'")),
    }
}

fn parse_fields(expr: &str) -> std::result::Result<Fields, String> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let (sec, rest) = match parts.len() {
        5 => ("0", &parts[..]),
        6 => (parts[0], &parts[1..]),
        n => return Err(format!("expected 5 or 6 fields, got {n}")),
    };

    let (days_of_month, dom_restricted) = parse_field(rest[2], 1, 31, None)?;
    let (mut days_of_week, dow_restricted) = parse_field(rest[4], 0, 7, Some(&DAY_NAMES))?;
    // 7 is an alias for Sunday.
    if days_of_week & (1 << 7) != 0 {
        days_of_week = (days_of_week & !(1 << 7)) | 1;
    }

    Ok(Fields {
        seconds: parse_field(sec, 0, 59, None)?.0,
        minutes: parse_field(rest[0], 0, 59, None)?.0,
        hours: parse_field(rest[1], 0, 23, None)?.0,
        days_of_month,
        months: parse_field(rest[3], 1, 12, Some(&MONTH_NAMES))?.0,
        days_of_week,
        dom_restricted,
        dow_restricted,
    })
}

/// Parse one field into a bitmask. The flag is false for `*` and `?`.
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: Option<&[&str]>,
) -> std::result::Result<(u64, bool), String> {
    if field == "*" || field == "?" {
        return Ok((range_mask(min, max, 1), false));
    }

    let value = |s: &str| -> std::result::Result<u32, String> {
        if let Some(names) = names {
            let upper = s.to_ascii_uppercase();
            if let Some(pos) = names.iter().position(|n| *n == upper) {
                // Month names start at 1, weekday names at 0.
                return Ok(pos as u32 + min);
            }
        }
        let v: u32 = s.parse().map_err(|_| format!("bad value '{s}'"))?;
        if v < min || v > max {
            return Err(format!("value {v} outside {min}-{max}"));
        }
        Ok(v)
    };

    let mut mask = 0u64;
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| format!("bad step '{step}'"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range == "*" || range == "?" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a)?, value(b)?)
        } else {
            let v = value(range)?;
            // `a/step` runs from a to the end of the range.
            (v, if step > 1 { max } else { v })
        };
        if lo > hi {
            return Err(format!("range {lo}-{hi} is reversed"));
        }
        mask |= range_mask(lo, hi, step);
    }
    Ok((mask, true))
}

fn range_mask(lo: u32, hi: u32, step: u32) -> u64 {
    (lo..=hi).step_by(step as usize).fold(0, |m, v| m | (1 << v))
}

fn has(mask: u64, v: u32) -> bool {
    mask & (1 << v) != 0
}

impl Fields {
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has(self.days_of_month, date.day());
        let dow = has(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = after.with_nanosecond(0)? + Duration::seconds(1);
        let horizon = after.year() + MAX_YEARS_AHEAD;

        while t.year() <= horizon {
            if !has(self.months, t.month()) {
                let (y, m) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
                t = NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = t.with_minute(0)?.with_second(0)? + Duration::hours(1);
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t = t.with_second(0)? + Duration::minutes(1);
                continue;
            }
            if !has(self.seconds, t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}
