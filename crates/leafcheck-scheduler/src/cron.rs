//! Daily trigger times.
//! Accepts either a plain `hour:minute` or a "MIN HOUR * * *" expression.
//! Minute/hour fields: `*`, `*/N`, `N`, `N,M,...`. Day fields must be `*`.
//! All times are UTC.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use leafcheck_core::config::ScheduleConfig;
use leafcheck_core::error::{LeafcheckError, Result};

/// The set of UTC times of day at which a batch fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    label: String,
}

impl DailySchedule {
    /// Once a day at `hour:minute` UTC.
    pub fn at(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(LeafcheckError::Config(format!(
                "Invalid schedule time {hour:02}:{minute:02}"
            )));
        }
        Ok(Self {
            minutes: vec![minute],
            hours: vec![hour],
            label: format!("daily at {hour:02}:{minute:02} UTC"),
        })
    }

    /// Parse "MIN HOUR DOM MON DOW"; only `*` is allowed for the day fields.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |why: &str| LeafcheckError::Config(format!("Invalid cron expression '{expression}': {why}"));

        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid("need 5 fields: MIN HOUR DOM MON DOW"));
        }
        if parts[2..].iter().any(|p| *p != "*") {
            return Err(invalid("day-of-month, month and day-of-week must be '*'"));
        }

        let minutes = parse_field(parts[0], 0, 59).ok_or_else(|| invalid("bad minute field"))?;
        let hours = parse_field(parts[1], 0, 23).ok_or_else(|| invalid("bad hour field"))?;
        Ok(Self {
            minutes,
            hours,
            label: format!("cron '{expression}' (UTC)"),
        })
    }

    /// The cron expression when one is set, the plain daily time otherwise.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        match config.cron.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(expression) => Self::parse(expression),
            None => Self::at(config.hour, config.minute),
        }
    }

    /// Human-readable description for status output.
    pub fn describe(&self) -> &str {
        &self.label
    }

    /// First firing time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = after.date_naive();
        (0..=1)
            .map(|offset| today + Duration::days(offset))
            .flat_map(|day| {
                self.hours.iter().flat_map(move |&h| {
                    self.minutes
                        .iter()
                        .filter_map(move |&m| NaiveTime::from_hms_opt(h, m, 0).map(|t| day.and_time(t)))
                })
            })
            .map(|naive| Utc.from_utc_datetime(&naive))
            .find(|candidate| *candidate > after)
    }
}

/// Parse a cron field into its sorted matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let mut values: Vec<u32> = if field == "*" {
        (min..=max).collect()
    } else if let Some(step) = field.strip_prefix("*/") {
        let n: usize = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        (min..=max).step_by(n).collect()
    } else {
        field
            .split(',')
            .map(|s| s.trim().parse::<u32>().ok().filter(|v| (min..=max).contains(v)))
            .collect::<Option<Vec<_>>>()?
    };
    values.sort_unstable();
    values.dedup();
    (!values.is_empty()).then_some(values)
}
