//! One-shot and cycle timers for scheduled operations.
//!
//! Times are UTC. A cycle fires at `hour:minute` on every day, on the listed
//! weekdays (Monday = 1), or on the listed days of the month. Month days a
//! month lacks (e.g. 31 in April) are skipped for that month.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};

/// Long enough for any month-day set to hit an existing date.
const SEARCH_DAYS: i64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleType {
    Once,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub cycle: CycleType,
    #[serde(default)]
    pub minute: u32,
    #[serde(default)]
    pub hour: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub month_days: Vec<u32>,
    /// Only for `Once`.
    #[serde(default)]
    pub exec_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_expired: bool,
}

impl Timer {
    fn cycle(cycle: CycleType, hour: u32, minute: u32) -> Self {
        Self {
            cycle,
            minute,
            hour,
            weekdays: Vec::new(),
            month_days: Vec::new(),
            exec_time: None,
            start_time: None,
            end_time: None,
            next_time: None,
            is_expired: false,
        }
    }

    pub fn once(exec_time: DateTime<Utc>) -> Self {
        Self {
            exec_time: Some(exec_time),
            ..Self::cycle(CycleType::Once, 0, 0)
        }
    }

    pub fn daily(hour: u32, minute: u32) -> Self {
        Self::cycle(CycleType::Day, hour, minute)
    }

    pub fn weekly(hour: u32, minute: u32, weekdays: &[u32]) -> Self {
        Self {
            weekdays: weekdays.to_vec(),
            ..Self::cycle(CycleType::Week, hour, minute)
        }
    }

    pub fn monthly(hour: u32, minute: u32, month_days: &[u32]) -> Self {
        Self {
            month_days: month_days.to_vec(),
            ..Self::cycle(CycleType::Month, hour, minute)
        }
    }

    /// Restrict firing to `[start, end]`.
    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle == CycleType::Once {
            return match self.exec_time {
                Some(_) => Ok(()),
                None => Err(CloudError::missing_parameter("exec_time")),
            };
        }
        if self.minute > 59 {
            return Err(CloudError::input_parameter(format!(
                "minute must be within 0..=59, got {}",
                self.minute
            )));
        }
        if self.hour > 23 {
            return Err(CloudError::input_parameter(format!(
                "hour must be within 0..=23, got {}",
                self.hour
            )));
        }
        match self.cycle {
            CycleType::Week => check_days("weekdays", &self.weekdays, 7),
            CycleType::Month => check_days("month_days", &self.month_days, 31),
            _ => Ok(()),
        }?;
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(CloudError::input_parameter("end_time is before start_time"));
            }
        }
        Ok(())
    }

    /// First firing strictly after `now`, ignoring the end bound.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.cycle == CycleType::Once {
            return self.exec_time.filter(|t| *t > now);
        }
        let base = match self.start_time {
            // A window that has not opened yet fires at its first slot.
            Some(start) if start > now => start - Duration::seconds(1),
            _ => now,
        };
        let at = NaiveTime::from_hms_opt(self.hour, self.minute, 0)?;
        (0..SEARCH_DAYS)
            .map(|offset| base.date_naive() + Duration::days(offset))
            .filter(|day| self.fires_on(day))
            .map(|day| Utc.from_utc_datetime(&day.and_time(at)))
            .find(|candidate| *candidate > base)
    }

    fn fires_on(&self, day: &chrono::NaiveDate) -> bool {
        match self.cycle {
            CycleType::Day => true,
            CycleType::Week => self.weekdays.contains(&day.weekday().number_from_monday()),
            CycleType::Month => self.month_days.contains(&day.day()),
            CycleType::Once => false,
        }
    }

    /// Advance `next_time` past `now`. The timer expires when there is no
    /// further firing or the next one falls after `end_time`.
    pub fn update(&mut self, now: DateTime<Utc>) {
        let next = self.next_after(now);
        self.next_time = next;
        self.is_expired = match (next, self.end_time) {
            (None, _) => true,
            (Some(next), Some(end)) => next > end,
            (Some(_), None) => false,
        };
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired && self.next_time.map_or(false, |t| t <= now)
    }

    pub fn describe(&self) -> String {
        let at = format!("{:02}:{:02}", self.hour, self.minute);
        match self.cycle {
            CycleType::Once => match self.exec_time {
                Some(t) => format!("once at {}", t.to_rfc3339()),
                None => "once".to_string(),
            },
            CycleType::Day => format!("daily at {}", at),
            CycleType::Week => format!("weekly on {:?} at {}", self.weekdays, at),
            CycleType::Month => format!("monthly on {:?} at {}", self.month_days, at),
        }
    }
}

fn check_days(field: &str, days: &[u32], max: u32) -> Result<()> {
    if days.is_empty() {
        return Err(CloudError::input_parameter(format!("{} must not be empty", field)));
    }
    if let Some(bad) = days.iter().find(|d| **d < 1 || **d > max) {
        return Err(CloudError::input_parameter(format!(
            "{} must be within 1..={}, got {}",
            field, max, bad
        )));
    }
    Ok(())
}
