use chrono::NaiveDate;
use chrono_tz::Tz;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::generate_slots;
use super::conflict::{now_ms, occupied_intervals};
use super::window::{day_bounds, local_date, resolve, DayPlan};
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots for one staff member, service and local date.
    pub async fn available_slots(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Span>, EngineError> {
        self.available_slots_at(staff_id, service_id, date, now_ms()).await
    }

    pub async fn available_slots_at(
        &self,
        staff_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        now: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let step = self.policy.step_minutes;
        if !(MIN_STEP_MINUTES..=MAX_STEP_MINUTES).contains(&step) {
            return Err(EngineError::invalid(format!(
                "slot step must be between {MIN_STEP_MINUTES} and {MAX_STEP_MINUTES} minutes"
            )));
        }
        let service = self
            .get_service(&service_id)
            .filter(|s| s.active)
            .ok_or(EngineError::NotFound("service", service_id))?;
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let guard = rs.read().await;
        if !guard.active {
            return Err(EngineError::NotFound("staff", staff_id));
        }

        let plan = resolve(&guard.schedule, date, guard.timezone)?;
        if plan.is_day_off() {
            return Ok(Vec::new());
        }
        let day = day_bounds(guard.timezone, date)?;
        let occupied = occupied_intervals(&guard, &day);
        drop(guard);

        let earliest = now + self.policy.min_lead_minutes as Ms * MINUTE_MS;
        let slots = generate_slots(
            &plan,
            &occupied,
            service.duration_minutes as Ms * MINUTE_MS,
            step as Ms * MINUTE_MS,
            earliest,
        )?;
        metrics::counter!(crate::observability::SLOT_QUERIES_TOTAL).increment(1);
        Ok(slots)
    }

    /// Working window and breaks for one staff member on one date.
    pub async fn day_plan(&self, staff_id: Ulid, date: NaiveDate) -> Result<DayPlan, EngineError> {
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let guard = rs.read().await;
        resolve(&guard.schedule, date, guard.timezone)
    }

    /// Occupied intervals of one staff member on one local date.
    pub async fn occupied(&self, staff_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let guard = rs.read().await;
        let day = day_bounds(guard.timezone, date)?;
        Ok(occupied_intervals(&guard, &day))
    }

    pub async fn list_staff(&self) -> Vec<StaffInfo> {
        let handles: Vec<_> = self.staff.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for rs in handles {
            out.push(rs.read().await.info());
        }
        out.sort_by_key(|s| s.id);
        out
    }

    pub async fn get_staff(&self, id: Ulid) -> Result<StaffInfo, EngineError> {
        let rs = self
            .get_staff_state(&id)
            .ok_or(EngineError::NotFound("staff", id))?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    pub async fn staff_timezone(&self, id: Ulid) -> Result<Tz, EngineError> {
        Ok(self.get_staff(id).await?.timezone)
    }

    /// All seven weekdays, unconfigured ones as a day off.
    pub async fn get_schedules(&self, staff_id: Ulid) -> Result<Vec<(u8, DaySchedule)>, EngineError> {
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let guard = rs.read().await;
        Ok(guard
            .schedule
            .entries()
            .map(|(weekday, day)| (weekday, day.cloned().unwrap_or_else(DaySchedule::day_off)))
            .collect())
    }

    pub fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn list_services(&self, include_inactive: bool) -> Vec<Service> {
        let mut out: Vec<Service> = self
            .services
            .iter()
            .filter(|e| include_inactive || e.value().active)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.name.cmp(&b.name)));
        out
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let staff_id = self
            .staff_for_appointment(&id)
            .ok_or(EngineError::NotFound("appointment", id))?;
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let guard = rs.read().await;
        guard
            .appointment(id)
            .cloned()
            .ok_or(EngineError::NotFound("appointment", id))
    }

    /// A staff member's appointments, optionally restricted to one local date.
    pub async fn staff_appointments(
        &self,
        staff_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, EngineError> {
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let guard = rs.read().await;
        match date {
            Some(date) => {
                let day = day_bounds(guard.timezone, date)?;
                Ok(guard
                    .appointments
                    .iter()
                    .filter(|a| day.start <= a.start && a.start < day.end)
                    .cloned()
                    .collect())
            }
            None => Ok(guard.appointments.clone()),
        }
    }

    /// Every appointment booked by one client across all staff, newest first.
    /// A client's appointments, newest first. `date` keeps those starting on
    /// that local day in their staff member's timezone.
    pub async fn client_appointments(
        &self,
        client_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, EngineError> {
        let handles: Vec<_> = self.staff.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            for a in guard.appointments.iter().filter(|a| a.client_id == client_id) {
                if let Some(date) = date
                    && local_date(guard.timezone, a.start)? != date
                {
                    continue;
                }
                out.push(a.clone());
            }
        }
        out.sort_by(|a, b| b.start.cmp(&a.start));
        Ok(out)
    }
}
