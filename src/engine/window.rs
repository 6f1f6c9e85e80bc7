use chrono::{Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone};
use chrono_tz::Tz;

use crate::model::*;

use super::availability::merge_overlapping;
use super::EngineError;

/// Working hours of one staff member on one concrete date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayPlan {
    DayOff,
    Working {
        window: Span,
        /// Clamped to `window`, sorted, disjoint.
        breaks: Vec<Span>,
    },
}

impl DayPlan {
    pub fn is_day_off(&self) -> bool {
        matches!(self, DayPlan::DayOff)
    }
}

/// 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Resolve the schedule entry for `date`'s weekday into absolute instants.
///
/// Fails closed: a missing entry, a non-working day or an empty window is a
/// day off. Malformed breaks are clamped, sorted and merged rather than
/// passed downstream.
pub fn resolve(schedule: &WeeklySchedule, date: NaiveDate, tz: Tz) -> Result<DayPlan, EngineError> {
    let Some(day) = schedule.get(weekday_index(date)) else {
        return Ok(DayPlan::DayOff);
    };
    if !day.is_working_day {
        return Ok(DayPlan::DayOff);
    }

    let start = local_instant(tz, date, day.start_time)?;
    let end = local_instant(tz, date, day.end_time)?;
    if start >= end {
        return Ok(DayPlan::DayOff);
    }
    let window = Span::new(start, end);

    let mut breaks = Vec::with_capacity(day.breaks.len());
    for b in &day.breaks {
        let b_start = local_instant(tz, date, b.start_time)?.max(start);
        let b_end = local_instant(tz, date, b.end_time)?.min(end);
        if b_start < b_end {
            breaks.push(Span::new(b_start, b_end));
        }
    }
    breaks.sort_by_key(|s| s.start);

    Ok(DayPlan::Working {
        window,
        breaks: merge_overlapping(&breaks),
    })
}

/// Local midnight to next local midnight.
pub fn day_bounds(tz: Tz, date: NaiveDate) -> Result<Span, EngineError> {
    let start = local_instant(tz, date, ClockTime::new(0, 0))?;
    let end = local_instant(tz, date, ClockTime::new(24, 0))?;
    Ok(Span::new(start, end))
}

/// The local calendar date an instant falls on.
pub fn local_date(tz: Tz, at: Ms) -> Result<NaiveDate, EngineError> {
    match tz.timestamp_millis_opt(at) {
        LocalResult::Single(t) => Ok(t.date_naive()),
        _ => Err(EngineError::invalid(format!("timestamp out of range: {at}"))),
    }
}

/// Convert a wall-clock time on `date` to an instant.
///
/// DST fold: the earlier instant wins. DST gap: the first instant after the gap.
pub fn local_instant(tz: Tz, date: NaiveDate, clock: ClockTime) -> Result<Ms, EngineError> {
    let naive = local_naive(date, clock)?;
    if let Some(ms) = earliest(tz, naive) {
        return Ok(ms);
    }
    let mut probe = naive;
    for _ in 0..(3 * 60) {
        probe += TimeDelta::minutes(1);
        if let Some(ms) = earliest(tz, probe) {
            return Ok(ms);
        }
    }
    Err(EngineError::invalid(format!(
        "local time {naive} does not exist in {tz}"
    )))
}

fn earliest(tz: Tz, naive: NaiveDateTime) -> Option<Ms> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t.timestamp_millis()),
        LocalResult::Ambiguous(first, _) => Some(first.timestamp_millis()),
        LocalResult::None => None,
    }
}

fn local_naive(date: NaiveDate, clock: ClockTime) -> Result<NaiveDateTime, EngineError> {
    if !clock.is_valid() {
        return Err(EngineError::invalid(format!(
            "invalid time of day {:02}:{:02}",
            clock.hours, clock.minutes
        )));
    }
    if clock.hours == 24 {
        let next = date
            .succ_opt()
            .ok_or_else(|| EngineError::invalid("date out of range"))?;
        return Ok(next.and_time(NaiveTime::MIN));
    }
    let time = NaiveTime::from_hms_opt(clock.hours as u32, clock.minutes as u32, 0)
        .ok_or_else(|| EngineError::invalid("invalid time of day"))?;
    Ok(date.and_time(time))
}
