//! Next-run computation for the three schedule kinds.
//!
//! Pure functions of the passed-in clock; nothing here touches the store.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use cron::Schedule;

use crate::ScheduleType;
use crate::error::{Error, Result};

/// Compute the next run strictly after `now`, or `None` for schedules with
/// no further runs (`once`).
pub fn calc_next_run(
    schedule_type: &str,
    schedule_value: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    match ScheduleType::parse(schedule_type) {
        Some(ScheduleType::Interval) => {
            let secs: i64 = schedule_value.trim().parse().map_err(|_| {
                Error::InvalidSchedule(format!(
                    "interval value must be an integer seconds count, got {schedule_value:?}"
                ))
            })?;
            if secs < 1 {
                return Err(Error::InvalidSchedule(format!(
                    "interval must be >= 1 second, got {secs}"
                )));
            }
            Ok(Some(now + chrono::Duration::seconds(secs)))
        }
        Some(ScheduleType::Cron) => {
            let schedule = parse_cron(schedule_value)?;
            schedule.after(&now).next().map(Some).ok_or_else(|| {
                Error::InvalidSchedule(format!(
                    "cron expression {schedule_value:?} has no upcoming run"
                ))
            })
        }
        Some(ScheduleType::Once) => Ok(None),
        None => Err(Error::InvalidSchedule(format!(
            "unknown schedule_type: {schedule_type:?}"
        ))),
    }
}

/// Compute a task's first run at creation time.
///
/// For `once` this parses `schedule_value` itself as an absolute timestamp;
/// the recurring kinds defer to [`calc_next_run`].
pub fn first_run(
    schedule_type: &str,
    schedule_value: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    if ScheduleType::parse(schedule_type) == Some(ScheduleType::Once) {
        return parse_once_timestamp(schedule_value).map(Some);
    }
    calc_next_run(schedule_type, schedule_value, now)
}

fn parse_cron(expr: &str) -> Result<Schedule> {
    if expr.split_whitespace().count() != 5 {
        return Err(Error::InvalidSchedule(format!(
            "cron expression must have 5 fields (min hour dom month dow), got {expr:?}"
        )));
    }
    // The cron crate wants a leading seconds field; pin it to zero.
    Schedule::from_str(&format!("0 {expr}"))
        .map_err(|e| Error::InvalidSchedule(format!("invalid cron expression {expr:?}: {e}")))
}

/// Parse an absolute ISO 8601 timestamp, normalized to UTC.
///
/// Accepts an explicit offset (`Z` included) or a naive timestamp, which is
/// taken as already-UTC.
fn parse_once_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|dt| dt.and_utc())
        .map_err(|_| {
            Error::InvalidSchedule(format!(
                "invalid ISO timestamp for 'once' schedule: {value:?}"
            ))
        })
}
