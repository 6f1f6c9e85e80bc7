use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::auth::{Role, Subject};
use crate::engine::{BookingRequest, ServicePatch, StaffPatch};
use crate::model::*;
use crate::policy::{authorize, Action, Resource};

use super::dto::*;
use super::error::{ApiError, ApiResult};
use super::{AppState, JsonBody, QueryParams};

fn ensure(subject: &Subject, resource: Resource<'_>, action: Action) -> ApiResult<()> {
    if authorize(subject, resource, action) {
        Ok(())
    } else {
        debug!(subject = %subject.id, ?resource, ?action, "forbidden");
        Err(ApiError::forbidden())
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Availability ─────────────────────────────────────────────────

pub async fn available_slots(
    State(state): State<AppState>,
    subject: Subject,
    QueryParams(q): QueryParams<SlotsQuery>,
) -> ApiResult<Json<Data<Vec<SlotDto>>>> {
    ensure(&subject, Resource::Availability, Action::Read)?;
    let staff_id = parse_id("staffId", &q.staff_id)?;
    let service_id = parse_id("serviceId", &q.service_id)?;
    let date = parse_date(&q.date)?;

    let slots = state
        .engine
        .available_slots(staff_id, service_id, date)
        .await?;
    let tz = state.engine.staff_timezone(staff_id).await?;
    Ok(Json(Data::new(
        slots.iter().map(|s| SlotDto::new(s, tz)).collect(),
    )))
}

// ── Schedules ────────────────────────────────────────────────────

pub async fn list_schedules(
    State(state): State<AppState>,
    subject: Subject,
    Path(id): Path<String>,
) -> ApiResult<Json<Data<Vec<ScheduleDto>>>> {
    let staff_id = parse_id("id", &id)?;
    ensure(&subject, Resource::Schedule { staff_id }, Action::Read)?;
    let schedules = state.engine.get_schedules(staff_id).await?;
    Ok(Json(Data::new(
        schedules
            .into_iter()
            .map(|(day_of_week, day)| ScheduleDto { day_of_week, day })
            .collect(),
    )))
}

pub async fn put_schedule(
    State(state): State<AppState>,
    subject: Subject,
    Path((id, day_of_week)): Path<(String, String)>,
    JsonBody(day): JsonBody<DaySchedule>,
) -> ApiResult<Json<Data<ScheduleDto>>> {
    let staff_id = parse_id("id", &id)?;
    let day_of_week: u8 = day_of_week
        .parse()
        .map_err(|_| ApiError::bad_request("dayOfWeek must be between 0 and 6"))?;
    ensure(&subject, Resource::Schedule { staff_id }, Action::Update)?;

    let day = state
        .engine
        .set_day_schedule(staff_id, day_of_week, day)
        .await?;
    info!(%staff_id, day_of_week, "schedule replaced");
    Ok(Json(Data::new(ScheduleDto { day_of_week, day })))
}

// ── Appointments ─────────────────────────────────────────────────

pub async fn create_appointment(
    State(state): State<AppState>,
    subject: Subject,
    JsonBody(body): JsonBody<CreateAppointment>,
) -> ApiResult<(StatusCode, Json<Data<AppointmentDto>>)> {
    let staff_id = parse_id("staffId", &body.staff_id)?;
    let service_id = parse_id("serviceId", &body.service_id)?;
    let client_id = match (subject.role, body.client_id) {
        (Role::Client, Some(client_id)) => client_id,
        (Role::Client, None) => subject.id.clone(),
        (_, Some(client_id)) => client_id,
        (_, None) => return Err(ApiError::bad_request("clientId is required")),
    };
    ensure(
        &subject,
        Resource::Appointment {
            staff_id,
            client_id: &client_id,
        },
        Action::Create,
    )?;

    let tz = state.engine.staff_timezone(staff_id).await?;
    let start = parse_start(&body.date, tz)?;
    let appointment = state
        .engine
        .book_appointment(BookingRequest {
            id: Ulid::new(),
            staff_id,
            service_id,
            client_id,
            start,
            notes: body.notes,
        })
        .await?;
    info!(id = %appointment.id, %staff_id, "appointment booked");
    Ok((
        StatusCode::CREATED,
        Json(Data::new(AppointmentDto::new(appointment, tz))),
    ))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    subject: Subject,
    QueryParams(q): QueryParams<AppointmentsQuery>,
) -> ApiResult<Json<Data<Vec<AppointmentDto>>>> {
    let date = q.date.as_deref().map(parse_date).transpose()?;
    let staff_id = match (q.staff_id.as_deref(), subject.role) {
        (Some(raw), _) => Some(parse_id("staffId", raw)?),
        (None, Role::Staff) => Some(parse_id("X-Subject-Id", &subject.id)?),
        (None, Role::Client) => None,
        (None, Role::Admin) => return Err(ApiError::bad_request("staffId is required")),
    };

    let appointments = match staff_id {
        Some(staff_id) => {
            ensure(&subject, Resource::StaffAppointments { staff_id }, Action::Read)?;
            state.engine.staff_appointments(staff_id, date).await?
        }
        None => state.engine.client_appointments(&subject.id, date).await?,
    };

    let mut out = Vec::with_capacity(appointments.len());
    for a in appointments {
        let tz = state.engine.staff_timezone(a.staff_id).await?;
        out.push(AppointmentDto::new(a, tz));
    }
    Ok(Json(Data::new(out)))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    subject: Subject,
    Path(id): Path<String>,
) -> ApiResult<Json<Data<AppointmentDto>>> {
    let id = parse_id("id", &id)?;
    let appointment = state.engine.get_appointment(id).await?;
    ensure(
        &subject,
        Resource::Appointment {
            staff_id: appointment.staff_id,
            client_id: &appointment.client_id,
        },
        Action::Read,
    )?;
    let tz = state.engine.staff_timezone(appointment.staff_id).await?;
    Ok(Json(Data::new(AppointmentDto::new(appointment, tz))))
}

pub async fn update_appointment_status(
    State(state): State<AppState>,
    subject: Subject,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<StatusChange>,
) -> ApiResult<Json<Data<AppointmentDto>>> {
    let id = parse_id("id", &id)?;
    let current = state.engine.get_appointment(id).await?;
    let action = if body.status == AppointmentStatus::Cancelled {
        Action::Cancel
    } else {
        Action::Update
    };
    ensure(
        &subject,
        Resource::Appointment {
            staff_id: current.staff_id,
            client_id: &current.client_id,
        },
        action,
    )?;

    let updated = state.engine.set_appointment_status(id, body.status).await?;
    info!(%id, status = updated.status.as_str(), "appointment status changed");
    let tz = state.engine.staff_timezone(updated.staff_id).await?;
    Ok(Json(Data::new(AppointmentDto::new(updated, tz))))
}

// ── Staff ────────────────────────────────────────────────────────

pub async fn list_staff(
    State(state): State<AppState>,
    subject: Subject,
) -> ApiResult<Json<Data<Vec<StaffDto>>>> {
    ensure(&subject, Resource::Catalog, Action::Read)?;
    let staff = state.engine.list_staff().await;
    Ok(Json(Data::new(staff.into_iter().map(StaffDto::from).collect())))
}

pub async fn get_staff(
    State(state): State<AppState>,
    subject: Subject,
    Path(id): Path<String>,
) -> ApiResult<Json<Data<StaffDto>>> {
    ensure(&subject, Resource::Catalog, Action::Read)?;
    let id = parse_id("id", &id)?;
    let info = state.engine.get_staff(id).await?;
    Ok(Json(Data::new(info.into())))
}

pub async fn create_staff(
    State(state): State<AppState>,
    subject: Subject,
    JsonBody(body): JsonBody<CreateStaff>,
) -> ApiResult<(StatusCode, Json<Data<StaffDto>>)> {
    ensure(&subject, Resource::Catalog, Action::Create)?;
    let timezone = body
        .timezone
        .unwrap_or_else(|| state.default_timezone.name().to_string());
    let info = state
        .engine
        .create_staff(Ulid::new(), body.name, &timezone)
        .await?;
    Ok((StatusCode::CREATED, Json(Data::new(info.into()))))
}

pub async fn update_staff(
    State(state): State<AppState>,
    subject: Subject,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateStaff>,
) -> ApiResult<Json<Data<StaffDto>>> {
    ensure(&subject, Resource::Catalog, Action::Update)?;
    let id = parse_id("id", &id)?;
    let info = state
        .engine
        .update_staff(
            id,
            StaffPatch {
                name: body.name,
                timezone: body.timezone,
                active: body.active,
            },
        )
        .await?;
    Ok(Json(Data::new(info.into())))
}

/// Server-sent events for every committed change to one staff member.
pub async fn staff_events(
    State(state): State<AppState>,
    subject: Subject,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let staff_id = parse_id("id", &id)?;
    ensure(&subject, Resource::StaffEvents { staff_id }, Action::Read)?;
    state.engine.get_staff(staff_id).await?;

    let rx = state.engine.notify.subscribe(staff_id);
    let events = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = SseEvent::default()
                        .event(event.kind())
                        .json_data(ChangeDto::from(&event))
                        .unwrap_or_else(|_| SseEvent::default().comment("unserializable event"));
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%staff_id, skipped, "change feed subscriber lagging");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ── Services ─────────────────────────────────────────────────────

pub async fn list_services(
    State(state): State<AppState>,
    subject: Subject,
    QueryParams(q): QueryParams<ServicesQuery>,
) -> ApiResult<Json<Data<Vec<Service>>>> {
    ensure(&subject, Resource::Catalog, Action::Read)?;
    let include_inactive = q.include_inactive && subject.role == Role::Admin;
    Ok(Json(Data::new(state.engine.list_services(include_inactive))))
}

pub async fn create_service(
    State(state): State<AppState>,
    subject: Subject,
    JsonBody(body): JsonBody<CreateService>,
) -> ApiResult<(StatusCode, Json<Data<Service>>)> {
    ensure(&subject, Resource::Catalog, Action::Create)?;
    let service = state
        .engine
        .create_service(
            Ulid::new(),
            body.name,
            body.duration_minutes,
            body.price,
            body.category,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(Data::new(service))))
}

pub async fn update_service(
    State(state): State<AppState>,
    subject: Subject,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<UpdateService>,
) -> ApiResult<Json<Data<Service>>> {
    ensure(&subject, Resource::Catalog, Action::Update)?;
    let id = parse_id("id", &id)?;
    let service = state
        .engine
        .update_service(
            id,
            ServicePatch {
                name: body.name,
                duration_minutes: body.duration_minutes,
                price: body.price,
                category: body.category,
                active: body.active,
            },
        )
        .await?;
    Ok(Json(Data::new(service)))
}
