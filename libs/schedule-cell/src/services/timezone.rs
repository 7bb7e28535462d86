// libs/schedule-cell/src/services/timezone.rs
//
// Pure wall-clock conversion between IANA timezones. No I/O: everything a
// slot projection needs is the calendar date, the two times and the zone
// names, so this stays a plain function module.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::models::{LocalizedSlot, ScheduleError, Slot};

/// A wall-clock window in some timezone. `date` is the calendar date of the
/// converted start; an `end_time` numerically before `start_time` means the
/// window crosses midnight in that zone.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWindow {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

pub fn parse_zone(id: &str) -> Result<Tz, ScheduleError> {
    id.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(id.to_string()))
}

/// Strict "HH:mm" parser for slot boundary inputs.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(format!("expected HH:mm, got '{}'", value)))
}

/// Pin a naive local reading to an instant in `tz`. Fall-back transitions
/// read the clock twice; we take the earlier instant. Spring-forward gaps
/// skip the reading entirely; we shift forward across the one-hour jump.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Result<DateTime<Tz>, ScheduleError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(earlier, _later) => Ok(earlier),
        LocalResult::None => tz
            .from_local_datetime(&(local + Duration::hours(1)))
            .earliest()
            .ok_or_else(|| {
                ScheduleError::InvalidTime(format!("unresolvable local time {}", local))
            }),
    }
}

/// Convert a wall-clock window from `source_tz` into `target_tz`, DST-aware.
/// The returned date is the converted start's calendar date, which can land
/// on the day before or after `date` depending on the zone offset.
pub fn convert_window(
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    source_tz: &str,
    target_tz: &str,
) -> Result<LocalWindow, ScheduleError> {
    if end_time <= start_time {
        return Err(ScheduleError::InvalidTime(
            "end_time must be after start_time".to_string(),
        ));
    }

    let source = parse_zone(source_tz)?;
    let target = parse_zone(target_tz)?;

    let start = resolve_local(source, date.and_time(start_time))?;
    let end = resolve_local(source, date.and_time(end_time))?;

    let start_local = start.with_timezone(&target).naive_local();
    let end_local = end.with_timezone(&target).naive_local();

    Ok(LocalWindow {
        date: start_local.date(),
        start_time: start_local.time(),
        end_time: end_local.time(),
    })
}

/// Project a slot into a viewer's timezone.
pub fn localize_slot(slot: &Slot, viewer_tz: &str) -> Result<LocalizedSlot, ScheduleError> {
    let window = convert_window(
        slot.slot_date,
        slot.start_time,
        slot.end_time,
        &slot.timezone,
        viewer_tz,
    )?;

    Ok(LocalizedSlot {
        slot_id: slot.id,
        vet_id: slot.vet_id,
        slot_date: window.date,
        start_time: window.start_time,
        end_time: window.end_time,
        timezone: viewer_tz.to_string(),
        status: slot.status.clone(),
    })
}
