mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod window;

pub use availability::{generate_slots, merge_overlapping, subtract_intervals};
pub use conflict::occupied_intervals;
pub use error::EngineError;
pub use mutations::{BookingRequest, ServicePatch, StaffPatch};
pub use window::{day_bounds, local_date, local_instant, resolve, weekday_index, DayPlan};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedStaffState = Arc<RwLock<StaffState>>;

/// Slot granularity and booking lead time, fixed per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    pub step_minutes: u32,
    pub min_lead_minutes: u32,
}

impl Default for SlotPolicy {
    fn default() -> Self {
        Self {
            step_minutes: 30,
            min_lead_minutes: 0,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then one
/// fsync for the whole batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Commit what we have before compaction or stats see the log.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub staff: DashMap<Ulid, SharedStaffState>,
    pub services: DashMap<Ulid, Service>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: appointment id → staff id
    pub(super) appointment_to_staff: DashMap<Ulid, Ulid>,
    /// Serializes catalog writes (staff creation, services) against compaction.
    pub(super) catalog_lock: Mutex<()>,
    pub policy: SlotPolicy,
}

pub(crate) fn parse_timezone(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::invalid(format!("unknown timezone: {name}")))
}

/// Apply a staff-scoped event to its state. Caller holds the write lock.
fn apply_to_staff(rs: &mut StaffState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::StaffUpdated {
            name,
            timezone,
            active,
            ..
        } => {
            rs.name = name.clone();
            match parse_timezone(timezone) {
                Ok(tz) => rs.timezone = tz,
                Err(e) => warn!("staff {}: keeping timezone {}: {e}", rs.id, rs.timezone),
            }
            rs.active = *active;
        }
        Event::ScheduleSet { weekday, day, .. } => {
            rs.schedule.set(*weekday, day.clone());
        }
        Event::AppointmentBooked {
            id,
            staff_id,
            service_id,
            client_id,
            start,
            duration_minutes,
            notes,
            created_at,
        } => {
            rs.insert_appointment(Appointment {
                id: *id,
                staff_id: *staff_id,
                service_id: *service_id,
                client_id: client_id.clone(),
                start: *start,
                duration_minutes: *duration_minutes,
                status: AppointmentStatus::Pending,
                notes: notes.clone(),
                created_at: *created_at,
            });
            index.insert(*id, *staff_id);
        }
        Event::AppointmentStatusChanged { id, status, .. } => {
            if let Some(appt) = rs.appointment_mut(*id) {
                appt.status = *status;
            }
        }
        // Catalog-level events are handled at the DashMap level, not here
        Event::StaffCreated { .. } | Event::ServiceCreated { .. } | Event::ServiceUpdated { .. } => {}
    }
}

fn apply_to_catalog(services: &DashMap<Ulid, Service>, event: &Event) {
    match event {
        Event::ServiceCreated {
            id,
            name,
            duration_minutes,
            price,
            category,
        } => {
            services.insert(
                *id,
                Service {
                    id: *id,
                    name: name.clone(),
                    duration_minutes: *duration_minutes,
                    price: *price,
                    category: category.clone(),
                    active: true,
                },
            );
        }
        Event::ServiceUpdated {
            id,
            name,
            duration_minutes,
            price,
            category,
            active,
        } => {
            services.insert(
                *id,
                Service {
                    id: *id,
                    name: name.clone(),
                    duration_minutes: *duration_minutes,
                    price: *price,
                    category: category.clone(),
                    active: *active,
                },
            );
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, policy: SlotPolicy) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            staff: DashMap::new(),
            services: DashMap::new(),
            wal_tx,
            notify,
            appointment_to_staff: DashMap::new(),
            catalog_lock: Mutex::new(()),
            policy,
        };

        // Replay into plain state first; locks only wrap the finished result.
        let mut replayed: HashMap<Ulid, StaffState> = HashMap::new();
        for event in &events {
            match event {
                Event::StaffCreated { id, name, timezone } => {
                    let tz = parse_timezone(timezone).unwrap_or_else(|e| {
                        warn!("replay: staff {id}: {e}, falling back to UTC");
                        Tz::UTC
                    });
                    replayed.insert(*id, StaffState::new(*id, name.clone(), tz));
                }
                Event::ServiceCreated { .. } | Event::ServiceUpdated { .. } => {
                    apply_to_catalog(&engine.services, event);
                }
                other => {
                    if let Some(staff_id) = other.staff_id()
                        && let Some(rs) = replayed.get_mut(&staff_id)
                    {
                        apply_to_staff(rs, other, &engine.appointment_to_staff);
                    }
                }
            }
        }
        for (id, rs) in replayed {
            engine.staff.insert(id, Arc::new(RwLock::new(rs)));
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_staff_state(&self, id: &Ulid) -> Option<SharedStaffState> {
        self.staff.get(id).map(|e| e.value().clone())
    }

    pub fn staff_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_to_staff.get(appointment_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify for staff-scoped events.
    pub(super) async fn persist_and_apply(
        &self,
        staff_id: Ulid,
        rs: &mut StaffState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_staff(rs, event, &self.appointment_to_staff);
        self.notify.send(staff_id, event);
        Ok(())
    }

    /// Lookup appointment → staff, acquire that staff member's write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<StaffState>), EngineError> {
        let staff_id = self
            .staff_for_appointment(appointment_id)
            .ok_or(EngineError::NotFound("appointment", *appointment_id))?;
        let rs = self
            .get_staff_state(&staff_id)
            .ok_or(EngineError::NotFound("staff", staff_id))?;
        let guard = rs.write_owned().await;
        Ok((staff_id, guard))
    }
}
