//! JSON shapes of the REST API. Instants leave the engine as Unix
//! milliseconds and are rendered here as RFC 3339 in the staff timezone.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::engine::local_instant;
use crate::model::*;

use super::error::{ApiError, ApiResult};

/// Success envelope: `{ "data": ... }`.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

impl<T> Data<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

pub fn format_instant(tz: Tz, at: Ms) -> String {
    DateTime::from_timestamp_millis(at)
        .map(|utc| utc.with_timezone(&tz).to_rfc3339())
        .unwrap_or_else(|| at.to_string())
}

pub fn parse_id(field: &str, raw: &str) -> ApiResult<Ulid> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{field} is not a valid id")))
}

pub fn parse_date(raw: &str) -> ApiResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("date must be YYYY-MM-DD"))
}

/// RFC 3339 with an offset, or a local `YYYY-MM-DDTHH:MM[:SS]` read in `tz`.
pub fn parse_start(raw: &str, tz: Tz) -> ApiResult<Ms> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        if at.second() != 0 || at.nanosecond() != 0 {
            return Err(ApiError::bad_request("appointments start on a whole minute"));
        }
        return Ok(at.timestamp_millis());
    }
    let local = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .map_err(|_| ApiError::bad_request("date must be an RFC 3339 timestamp"))?;
    if local.second() != 0 || local.nanosecond() != 0 {
        return Err(ApiError::bad_request("appointments start on a whole minute"));
    }
    let clock = ClockTime::new(local.hour() as u8, local.minute() as u8);
    Ok(local_instant(tz, local.date(), clock)?)
}

/// Marks a field that was present in the body, even as `null`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SlotDto {
    pub start: String,
    pub end: String,
}

impl SlotDto {
    pub fn new(span: &Span, tz: Tz) -> Self {
        Self {
            start: format_instant(tz, span.start),
            end: format_instant(tz, span.end),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffDto {
    pub id: Ulid,
    pub name: String,
    pub timezone: String,
    pub active: bool,
}

impl From<StaffInfo> for StaffDto {
    fn from(info: StaffInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            timezone: info.timezone.name().to_string(),
            active: info.active,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDto {
    pub day_of_week: u8,
    #[serde(flatten)]
    pub day: DaySchedule,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDto {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub client_id: String,
    pub date: String,
    pub end: String,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: String,
}

impl AppointmentDto {
    pub fn new(a: Appointment, tz: Tz) -> Self {
        Self {
            date: format_instant(tz, a.start),
            end: format_instant(tz, a.end()),
            created_at: format_instant(tz, a.created_at),
            id: a.id,
            staff_id: a.staff_id,
            service_id: a.service_id,
            client_id: a.client_id,
            duration_minutes: a.duration_minutes,
            status: a.status,
            notes: a.notes,
        }
    }
}

/// Payload of one change-feed message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDto {
    pub kind: &'static str,
    pub staff_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
}

impl From<&Event> for ChangeDto {
    fn from(event: &Event) -> Self {
        let mut dto = ChangeDto {
            kind: event.kind(),
            staff_id: event.staff_id(),
            appointment_id: None,
            status: None,
            day_of_week: None,
        };
        match event {
            Event::AppointmentBooked { id, .. } => {
                dto.appointment_id = Some(*id);
                dto.status = Some(AppointmentStatus::Pending);
            }
            Event::AppointmentStatusChanged { id, status, .. } => {
                dto.appointment_id = Some(*id);
                dto.status = Some(*status);
            }
            Event::ScheduleSet { weekday, .. } => dto.day_of_week = Some(*weekday),
            _ => {}
        }
        dto
    }
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotsQuery {
    pub staff_id: String,
    pub service_id: String,
    pub date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentsQuery {
    pub staff_id: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointment {
    pub service_id: String,
    pub staff_id: String,
    pub date: String,
    pub notes: Option<String>,
    /// Required when staff or an admin books on a client's behalf.
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStaff {
    pub name: String,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStaff {
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateService {
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub price: i64,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateService {
    pub name: Option<String>,
    pub duration_minutes: Option<u32>,
    pub price: Option<i64>,
    /// Absent keeps the category, `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub category: Option<Option<String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}
