use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::subtract_intervals;
use super::conflict::{check_no_conflict, now_ms, validate_instant};
use super::window::{local_date, resolve, DayPlan};
use super::{apply_to_catalog, parse_timezone, Engine, EngineError, WalCommand};

#[derive(Debug, Clone, Default)]
pub struct StaffPatch {
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub duration_minutes: Option<u32>,
    pub price: Option<i64>,
    /// `Some(None)` clears the category.
    pub category: Option<Option<String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub client_id: String,
    pub start: Ms,
    pub notes: Option<String>,
}

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::invalid(format!("{what} must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn validate_service_fields(
    duration_minutes: u32,
    price: i64,
    category: Option<&str>,
) -> Result<(), EngineError> {
    if duration_minutes == 0 {
        return Err(EngineError::invalid("service duration must be positive"));
    }
    if duration_minutes > MAX_SERVICE_MINUTES {
        return Err(EngineError::LimitExceeded("service duration too long"));
    }
    if price < 0 {
        return Err(EngineError::invalid("price must not be negative"));
    }
    if category.is_some_and(|c| c.len() > MAX_CATEGORY_LEN) {
        return Err(EngineError::LimitExceeded("category too long"));
    }
    Ok(())
}

/// Working-day invariants: start < end, every break inside the window,
/// breaks pairwise disjoint. Days off only need well-formed clock values.
pub fn validate_day_schedule(day: &DaySchedule) -> Result<(), EngineError> {
    let clocks = [day.start_time, day.end_time]
        .into_iter()
        .chain(day.breaks.iter().flat_map(|b| [b.start_time, b.end_time]));
    for clock in clocks {
        if !clock.is_valid() {
            return Err(EngineError::invalid(format!(
                "invalid time of day {:02}:{:02}",
                clock.hours, clock.minutes
            )));
        }
    }
    if day.breaks.len() > MAX_BREAKS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many breaks"));
    }
    if day.breaks.iter().any(|b| b.name.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("break name too long"));
    }
    if !day.is_working_day {
        return Ok(());
    }

    if day.start_time >= day.end_time {
        return Err(EngineError::invalid("startTime must be before endTime"));
    }
    let mut breaks: Vec<&Break> = day.breaks.iter().collect();
    breaks.sort_by_key(|b| b.start_time);
    for b in &breaks {
        if b.start_time >= b.end_time {
            return Err(EngineError::invalid(format!(
                "break '{}' must start before it ends",
                b.name
            )));
        }
        if b.start_time < day.start_time || b.end_time > day.end_time {
            return Err(EngineError::invalid(format!(
                "break '{}' lies outside working hours",
                b.name
            )));
        }
    }
    for pair in breaks.windows(2) {
        if pair[1].start_time < pair[0].end_time {
            return Err(EngineError::invalid(format!(
                "breaks '{}' and '{}' overlap",
                pair[0].name, pair[1].name
            )));
        }
    }
    Ok(())
}

impl Engine {
    pub async fn create_staff(
        &self,
        id: Ulid,
        name: String,
        timezone: &str,
    ) -> Result<StaffInfo, EngineError> {
        validate_name(&name, "staff name")?;
        let tz = parse_timezone(timezone)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.staff.len() >= MAX_STAFF {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        if self.staff.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::StaffCreated {
            id,
            name: name.clone(),
            timezone: tz.name().to_string(),
        };
        self.wal_append(&event).await?;
        let rs = StaffState::new(id, name, tz);
        let info = rs.info();
        self.staff.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        info!("staff {id} created");
        Ok(info)
    }

    pub async fn update_staff(&self, id: Ulid, patch: StaffPatch) -> Result<StaffInfo, EngineError> {
        if let Some(ref n) = patch.name {
            validate_name(n, "staff name")?;
        }
        let tz = match patch.timezone.as_deref() {
            Some(name) => Some(parse_timezone(name)?),
            None => None,
        };
        let rs = self
            .get_staff_state(&id)
            .ok_or(EngineError::NotFound("staff", id))?;
        let mut guard = rs.write().await;

        let event = Event::StaffUpdated {
            id,
            name: patch.name.unwrap_or_else(|| guard.name.clone()),
            timezone: tz.unwrap_or(guard.timezone).name().to_string(),
            active: patch.active.unwrap_or(guard.active),
        };
        self.persist_and_apply(id, &mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Replace one weekday's schedule. Existing appointments are untouched.
    pub async fn set_day_schedule(
        &self,
        staff_id: Ulid,
        weekday: u8,
        day: DaySchedule,
    ) -> Result<DaySchedule, EngineError> {
        if weekday > 6 {
            return Err(EngineError::invalid("dayOfWeek must be between 0 and 6"));
        }
        validate_day_schedule(&day)?;
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let mut guard = rs.write().await;

        let event = Event::ScheduleSet {
            staff_id,
            weekday,
            day: day.clone(),
        };
        self.persist_and_apply(staff_id, &mut guard, &event).await?;
        Ok(day)
    }

    pub async fn create_service(
        &self,
        id: Ulid,
        name: String,
        duration_minutes: u32,
        price: i64,
        category: Option<String>,
    ) -> Result<Service, EngineError> {
        validate_name(&name, "service name")?;
        validate_service_fields(duration_minutes, price, category.as_deref())?;

        let _catalog = self.catalog_lock.lock().await;
        if self.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if self.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ServiceCreated {
            id,
            name,
            duration_minutes,
            price,
            category,
        };
        self.wal_append(&event).await?;
        apply_to_catalog(&self.services, &event);
        self.get_service(&id).ok_or(EngineError::NotFound("service", id))
    }

    /// Edits never reach already-booked appointments: they carry their own duration.
    pub async fn update_service(&self, id: Ulid, patch: ServicePatch) -> Result<Service, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let current = self
            .get_service(&id)
            .ok_or(EngineError::NotFound("service", id))?;

        let name = patch.name.unwrap_or(current.name);
        let duration_minutes = patch.duration_minutes.unwrap_or(current.duration_minutes);
        let price = patch.price.unwrap_or(current.price);
        let category = patch.category.unwrap_or(current.category);
        validate_name(&name, "service name")?;
        validate_service_fields(duration_minutes, price, category.as_deref())?;

        let event = Event::ServiceUpdated {
            id,
            name,
            duration_minutes,
            price,
            category,
            active: patch.active.unwrap_or(current.active),
        };
        self.wal_append(&event).await?;
        apply_to_catalog(&self.services, &event);
        self.get_service(&id).ok_or(EngineError::NotFound("service", id))
    }

    pub async fn book_appointment(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        self.book_appointment_at(req, now_ms()).await
    }

    /// Atomic check-and-insert under the staff member's write lock: two
    /// overlapping bookings racing for the same staff member serialize here,
    /// and the loser gets `Conflict`.
    pub async fn book_appointment_at(
        &self,
        req: BookingRequest,
        now: Ms,
    ) -> Result<Appointment, EngineError> {
        validate_instant(req.start)?;
        if req.client_id.trim().is_empty() {
            return Err(EngineError::invalid("clientId must not be empty"));
        }
        if req.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(EngineError::LimitExceeded("clientId too long"));
        }
        if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        let service = self
            .get_service(&req.service_id)
            .filter(|s| s.active)
            .ok_or(EngineError::NotFound("service", req.service_id))?;

        let earliest = now + self.policy.min_lead_minutes as Ms * MINUTE_MS;
        if req.start < earliest {
            return Err(EngineError::invalid(
                "appointment must start after the minimum booking lead time",
            ));
        }

        let rs = self
            .get_staff_state(&req.staff_id)
            .ok_or(EngineError::NotFound("staff", req.staff_id))?;
        let mut guard = rs.write().await;
        if !guard.active {
            return Err(EngineError::NotFound("staff", req.staff_id));
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many appointments for staff member"));
        }
        if self.appointment_to_staff.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        let span = Span::new(
            req.start,
            req.start + service.duration_minutes as Ms * MINUTE_MS,
        );
        ensure_within_working_hours(&guard, &span)?;
        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            debug!("booking {} rejected: {e}", req.id);
            return Err(e);
        }

        let event = Event::AppointmentBooked {
            id: req.id,
            staff_id: req.staff_id,
            service_id: req.service_id,
            client_id: req.client_id,
            start: req.start,
            duration_minutes: service.duration_minutes,
            notes: req.notes,
            created_at: now,
        };
        self.persist_and_apply(req.staff_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);
        guard
            .appointment(req.id)
            .cloned()
            .ok_or(EngineError::NotFound("appointment", req.id))
    }

    pub async fn set_appointment_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let (staff_id, mut guard) = self.resolve_appointment_write(&id).await?;
        let current = guard
            .appointment(id)
            .map(|a| a.status)
            .ok_or(EngineError::NotFound("appointment", id))?;
        if !current.can_transition_to(status) {
            return Err(EngineError::invalid(format!(
                "cannot change status from {} to {}",
                current.as_str(),
                status.as_str()
            )));
        }

        let event = Event::AppointmentStatusChanged { id, staff_id, status };
        self.persist_and_apply(staff_id, &mut guard, &event).await?;
        guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::NotFound("appointment", id))
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Every staff read lock and the catalog lock are held until the writer
    /// swaps the file, so no acknowledged append can fall between the
    /// snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut staff: Vec<(Ulid, super::SharedStaffState)> = self
            .staff
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        staff.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(staff.len());
        for (_, rs) in &staff {
            guards.push(rs.clone().read_owned().await);
        }

        let mut events = Vec::new();
        let mut services: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        for s in services {
            events.push(Event::ServiceCreated {
                id: s.id,
                name: s.name.clone(),
                duration_minutes: s.duration_minutes,
                price: s.price,
                category: s.category.clone(),
            });
            if !s.active {
                events.push(Event::ServiceUpdated {
                    id: s.id,
                    name: s.name,
                    duration_minutes: s.duration_minutes,
                    price: s.price,
                    category: s.category,
                    active: false,
                });
            }
        }

        for guard in &guards {
            events.push(Event::StaffCreated {
                id: guard.id,
                name: guard.name.clone(),
                timezone: guard.timezone.name().to_string(),
            });
            if !guard.active {
                events.push(Event::StaffUpdated {
                    id: guard.id,
                    name: guard.name.clone(),
                    timezone: guard.timezone.name().to_string(),
                    active: false,
                });
            }
            for (weekday, day) in guard.schedule.entries() {
                if let Some(day) = day {
                    events.push(Event::ScheduleSet {
                        staff_id: guard.id,
                        weekday,
                        day: day.clone(),
                    });
                }
            }
            for a in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: a.id,
                    staff_id: a.staff_id,
                    service_id: a.service_id,
                    client_id: a.client_id.clone(),
                    start: a.start,
                    duration_minutes: a.duration_minutes,
                    notes: a.notes.clone(),
                    created_at: a.created_at,
                });
                if a.status != AppointmentStatus::Pending {
                    events.push(Event::AppointmentStatusChanged {
                        id: a.id,
                        staff_id: a.staff_id,
                        status: a.status,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The booked interval must sit inside that day's working window and miss every break.
fn ensure_within_working_hours(rs: &StaffState, span: &Span) -> Result<(), EngineError> {
    let date = local_date(rs.timezone, span.start)?;
    let DayPlan::Working { window, breaks } = resolve(&rs.schedule, date, rs.timezone)? else {
        return Err(EngineError::invalid(format!(
            "staff member does not work on {date}"
        )));
    };
    let free = subtract_intervals(&[window], &breaks);
    if free.iter().any(|f| f.contains_span(span)) {
        Ok(())
    } else {
        Err(EngineError::invalid("appointment falls outside working hours"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(start: (u8, u8), end: (u8, u8), breaks: &[(&str, (u8, u8), (u8, u8))]) -> DaySchedule {
        DaySchedule {
            is_working_day: true,
            start_time: ClockTime::new(start.0, start.1),
            end_time: ClockTime::new(end.0, end.1),
            breaks: breaks
                .iter()
                .map(|(name, s, e)| Break {
                    name: name.to_string(),
                    start_time: ClockTime::new(s.0, s.1),
                    end_time: ClockTime::new(e.0, e.1),
                })
                .collect(),
        }
    }

    #[test]
    fn valid_schedule_passes() {
        let d = day((9, 0), (18, 0), &[("lunch", (12, 0), (13, 0)), ("tea", (15, 0), (15, 15))]);
        assert!(validate_day_schedule(&d).is_ok());
    }

    #[test]
    fn unsorted_but_disjoint_breaks_pass() {
        let d = day((9, 0), (18, 0), &[("tea", (15, 0), (15, 15)), ("lunch", (12, 0), (13, 0))]);
        assert!(validate_day_schedule(&d).is_ok());
    }

    #[test]
    fn inverted_window_rejected() {
        let d = day((18, 0), (9, 0), &[]);
        assert!(matches!(validate_day_schedule(&d), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn break_outside_window_rejected() {
        let d = day((9, 0), (18, 0), &[("early", (8, 30), (9, 30))]);
        assert!(matches!(validate_day_schedule(&d), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn overlapping_breaks_rejected() {
        let d = day((9, 0), (18, 0), &[("a", (12, 0), (13, 0)), ("b", (12, 30), (13, 30))]);
        let err = validate_day_schedule(&d).unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn adjacent_breaks_allowed() {
        let d = day((9, 0), (18, 0), &[("a", (12, 0), (13, 0)), ("b", (13, 0), (13, 30))]);
        assert!(validate_day_schedule(&d).is_ok());
    }

    #[test]
    fn day_off_skips_ordering_checks() {
        let mut d = day((0, 0), (0, 0), &[]);
        d.is_working_day = false;
        assert!(validate_day_schedule(&d).is_ok());
        d.end_time = ClockTime::new(25, 0);
        assert!(validate_day_schedule(&d).is_err());
    }
}
