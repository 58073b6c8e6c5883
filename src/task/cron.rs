//! Cron expressions.
//!
//! Standard five-field expressions (`minute hour day-of-month month
//! day-of-week`) plus an optional leading seconds field. Each field accepts
//! `*`, single values, ranges (`1-5`), steps (`*/15`, `10-40/10`, `5/20`) and
//! comma lists of those. Months and weekdays also accept three-letter names;
//! weekday `7` is Sunday.
//!
//! When both day-of-month and day-of-week are restricted a time matches if
//! *either* matches. All times are UTC.

use crate::task::error::CronError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Give up looking for a match this many years past the start time
const SEARCH_HORIZON_YEARS: i32 = 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const SECONDS: FieldSpec = FieldSpec { name: "second", min: 0, max: 59, names: &[] };
const MINUTES: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOURS: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAYS_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTHS: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES };
// 7 is accepted and folded onto 0
const DAYS_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: &WEEKDAY_NAMES };

/// Set of allowed values for one field, as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ValueSet(u64);

impl ValueSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }

    fn insert(&mut self, value: u32) {
        self.0 |= 1 << value;
    }
}

/// Parsed cron expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    seconds: ValueSet,
    minutes: ValueSet,
    hours: ValueSet,
    days_of_month: ValueSet,
    months: ValueSet,
    days_of_week: ValueSet,
    day_of_month_restricted: bool,
    day_of_week_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (seconds, rest) = match fields.len() {
            5 => (ValueSet(1), &fields[..]),
            6 => (parse_field(fields[0], SECONDS)?, &fields[1..]),
            n => return Err(CronError::FieldCount(n)),
        };

        let mut days_of_week = parse_field(rest[4], DAYS_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            expression: fields.join(" "),
            seconds,
            minutes: parse_field(rest[0], MINUTES)?,
            hours: parse_field(rest[1], HOURS)?,
            days_of_month: parse_field(rest[2], DAYS_OF_MONTH)?,
            months: parse_field(rest[3], MONTHS)?,
            days_of_week,
            day_of_month_restricted: !rest[2].starts_with('*'),
            day_of_week_restricted: !rest[4].starts_with('*'),
        })
    }

    pub fn is_valid(expression: &str) -> bool {
        Self::parse(expression).is_ok()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether `time` (to the second) is a fire time
    pub fn matches(&self, time: &DateTime<Utc>) -> bool {
        self.months.contains(time.month())
            && self.day_matches(time.date_naive())
            && self.hours.contains(time.hour())
            && self.minutes.contains(time.minute())
            && self.seconds.contains(time.second())
    }

    /// First fire time strictly after `after`.
    ///
    /// `None` when the expression never fires within the search horizon
    /// (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut time = after.with_nanosecond(0)? + Duration::seconds(1);
        let horizon = after.year() + SEARCH_HORIZON_YEARS;

        while time.year() <= horizon {
            if !self.months.contains(time.month()) {
                let (year, month) = if time.month() == 12 {
                    (time.year() + 1, 1)
                } else {
                    (time.year(), time.month() + 1)
                };
                time = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(time.date_naive()) {
                time = time.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !self.hours.contains(time.hour()) {
                time = time.with_minute(0)?.with_second(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(time.minute()) {
                time = time.with_second(0)? + Duration::minutes(1);
                continue;
            }
            if !self.seconds.contains(time.second()) {
                time += Duration::seconds(1);
                continue;
            }
            return Some(time);
        }
        None
    }

    /// The next `count` fire times after `after`
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = after;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        match (self.day_of_month_restricted, self.day_of_week_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_field(text: &str, spec: FieldSpec) -> Result<ValueSet, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: spec.name,
        value: text.to_string(),
        reason,
    };

    let mut set = ValueSet(0);
    for item in text.split(',') {
        if item.is_empty() {
            return Err(invalid("empty list item".to_string()));
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step '{}'", step)))?;
                if step == 0 {
                    return Err(invalid("step must be positive".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((low, high)) = range.split_once('-') {
            (
                parse_value(low, spec).map_err(&invalid)?,
                parse_value(high, spec).map_err(&invalid)?,
            )
        } else {
            let value = parse_value(range, spec).map_err(&invalid)?;
            // `5/20` runs from 5 to the field maximum
            (value, if step.is_some() { spec.max } else { value })
        };

        if start > end {
            return Err(invalid(format!("range {}-{} is reversed", start, end)));
        }

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            set.insert(value);
        }
    }
    Ok(set)
}

fn parse_value(text: &str, spec: FieldSpec) -> Result<u32, String> {
    let lowered = text.to_ascii_lowercase();
    if let Some(index) = spec.names.iter().position(|name| *name == lowered) {
        // Month names start at 1, weekday names at 0
        return Ok(index as u32 + spec.min);
    }
    let value: u32 = text
        .parse()
        .map_err(|_| format!("'{}' is not a number", text))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} is outside {}-{}",
            value, spec.min, spec.max
        ));
    }
    Ok(value)
}
