use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Weekly schedule ──────────────────────────────────────────────

/// Wall-clock time of day in the staff member's business timezone.
/// `24:00` is accepted as an end-of-day marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClockTime {
    pub hours: u8,
    pub minutes: u8,
}

impl ClockTime {
    pub const fn new(hours: u8, minutes: u8) -> Self {
        Self { hours, minutes }
    }

    pub fn is_valid(&self) -> bool {
        (self.hours < 24 && self.minutes < 60) || (self.hours == 24 && self.minutes == 0)
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        self.hours as u32 * 60 + self.minutes as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Break {
    pub name: String,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

/// One weekday's working hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub is_working_day: bool,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    #[serde(default)]
    pub breaks: Vec<Break>,
}

impl DaySchedule {
    /// Placeholder returned for weekdays that were never configured.
    pub fn day_off() -> Self {
        Self {
            is_working_day: false,
            start_time: ClockTime::new(9, 0),
            end_time: ClockTime::new(17, 0),
            breaks: Vec::new(),
        }
    }
}

/// Indexed by weekday, 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeeklySchedule {
    days: [Option<DaySchedule>; 7],
}

impl WeeklySchedule {
    pub fn get(&self, weekday: u8) -> Option<&DaySchedule> {
        self.days.get(weekday as usize).and_then(Option::as_ref)
    }

    pub fn set(&mut self, weekday: u8, day: DaySchedule) {
        if let Some(slot) = self.days.get_mut(weekday as usize) {
            *slot = Some(day);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (u8, Option<&DaySchedule>)> {
        self.days
            .iter()
            .enumerate()
            .map(|(i, d)| (i as u8, d.as_ref()))
    }
}

// ── Services & appointments ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    /// Minor currency units.
    pub price: i64,
    pub category: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Every status except `Cancelled` keeps its interval occupied.
    pub fn occupies(self) -> bool {
        self != AppointmentStatus::Cancelled
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled | NoShow) | (Confirmed, Completed | Cancelled | NoShow)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub client_id: String,
    pub start: Ms,
    /// Copied from the service when booked; later service edits don't touch it.
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
}

impl Appointment {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end())
    }

    pub fn end(&self) -> Ms {
        self.start + self.duration_minutes as Ms * MINUTE_MS
    }
}

// ── Per-staff state ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StaffState {
    pub id: Ulid,
    pub name: String,
    /// Fixed business timezone for every wall-clock conversion of this staff member.
    pub timezone: Tz,
    pub active: bool,
    pub schedule: WeeklySchedule,
    /// All appointments ever booked (cancelled included), sorted by `start`.
    pub appointments: Vec<Appointment>,
}

impl StaffState {
    pub fn new(id: Ulid, name: String, timezone: Tz) -> Self {
        Self {
            id,
            name,
            timezone,
            active: true,
            schedule: WeeklySchedule::default(),
            appointments: Vec::new(),
        }
    }

    /// Insert appointment maintaining sort order by start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.start <= appointment.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments whose interval overlaps the query window, any status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self.appointments.partition_point(|a| a.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.end() > query.start)
    }

    pub fn info(&self) -> StaffInfo {
        StaffInfo {
            id: self.id,
            name: self.name.clone(),
            timezone: self.timezone,
            active: self.active,
        }
    }
}

/// Flat events, no nesting beyond value types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StaffCreated {
        id: Ulid,
        name: String,
        timezone: String,
    },
    StaffUpdated {
        id: Ulid,
        name: String,
        timezone: String,
        active: bool,
    },
    ScheduleSet {
        staff_id: Ulid,
        weekday: u8,
        day: DaySchedule,
    },
    ServiceCreated {
        id: Ulid,
        name: String,
        duration_minutes: u32,
        price: i64,
        category: Option<String>,
    },
    ServiceUpdated {
        id: Ulid,
        name: String,
        duration_minutes: u32,
        price: i64,
        category: Option<String>,
        active: bool,
    },
    AppointmentBooked {
        id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        client_id: String,
        start: Ms,
        duration_minutes: u32,
        notes: Option<String>,
        created_at: Ms,
    },
    AppointmentStatusChanged {
        id: Ulid,
        staff_id: Ulid,
        status: AppointmentStatus,
    },
}

impl Event {
    /// The staff member this event is scoped to, if any.
    pub fn staff_id(&self) -> Option<Ulid> {
        match self {
            Event::StaffCreated { id, .. } | Event::StaffUpdated { id, .. } => Some(*id),
            Event::ScheduleSet { staff_id, .. }
            | Event::AppointmentBooked { staff_id, .. }
            | Event::AppointmentStatusChanged { staff_id, .. } => Some(*staff_id),
            Event::ServiceCreated { .. } | Event::ServiceUpdated { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::StaffCreated { .. } => "staff_created",
            Event::StaffUpdated { .. } => "staff_updated",
            Event::ScheduleSet { .. } => "schedule_set",
            Event::ServiceCreated { .. } => "service_created",
            Event::ServiceUpdated { .. } => "service_updated",
            Event::AppointmentBooked { .. } => "appointment_booked",
            Event::AppointmentStatusChanged { .. } => "appointment_status_changed",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffInfo {
    pub id: Ulid,
    pub name: String,
    pub timezone: Tz,
    pub active: bool,
}
