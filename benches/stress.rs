use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use slotd::engine::{BookingRequest, Engine, EngineError, SlotPolicy};
use slotd::model::{Break, ClockTime, DaySchedule, MINUTE_MS};
use slotd::notify::NotifyHub;

const STAFF: usize = 20;
const DAYS: u64 = 28;
const QUERY_ROUNDS: usize = 50;
const BOOKING_TASKS: usize = 64;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        percentile(latencies, 100.0).as_secs_f64() * 1000.0,
    );
}

fn working_day() -> DaySchedule {
    DaySchedule {
        is_working_day: true,
        start_time: ClockTime::new(9, 0),
        end_time: ClockTime::new(19, 0),
        breaks: vec![
            Break {
                name: "Lunch".into(),
                start_time: ClockTime::new(12, 30),
                end_time: ClockTime::new(13, 30),
            },
            Break {
                name: "Tea".into(),
                start_time: ClockTime::new(16, 0),
                end_time: ClockTime::new(16, 15),
            },
        ],
    }
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 3).unwrap_or_default()
}

async fn setup(engine: &Engine) -> (Vec<Ulid>, Ulid) {
    let service_id = Ulid::new();
    engine
        .create_service(service_id, "Cut".into(), 45, 30_000, None)
        .await
        .unwrap();

    let mut staff = Vec::with_capacity(STAFF);
    for i in 0..STAFF {
        let id = Ulid::new();
        engine
            .create_staff(id, format!("stylist-{i}"), "Europe/Istanbul")
            .await
            .unwrap();
        for weekday in 0..7 {
            engine.set_day_schedule(id, weekday, working_day()).await.unwrap();
        }
        staff.push(id);
    }
    println!("  created {STAFF} staff members, 1 service");
    (staff, service_id)
}

/// Fill every other free slot so availability has real gaps to walk.
async fn prefill(engine: &Engine, staff: &[Ulid], service_id: Ulid) -> usize {
    let mut booked = 0;
    for &staff_id in staff {
        for d in 0..DAYS {
            let date = first_day() + Days::new(d);
            let slots = engine.available_slots(staff_id, service_id, date).await.unwrap();
            for slot in slots.iter().step_by(3) {
                let req = BookingRequest {
                    id: Ulid::new(),
                    staff_id,
                    service_id,
                    client_id: format!("client-{booked}"),
                    start: slot.start,
                    notes: None,
                };
                if engine.book_appointment(req).await.is_ok() {
                    booked += 1;
                }
            }
        }
    }
    booked
}

async fn bench_queries(engine: &Engine, staff: &[Ulid], service_id: Ulid) {
    let mut latencies = Vec::with_capacity(QUERY_ROUNDS * staff.len());
    for round in 0..QUERY_ROUNDS {
        let date = first_day() + Days::new(round as u64 % DAYS);
        for &staff_id in staff {
            let start = Instant::now();
            let _ = engine.available_slots(staff_id, service_id, date).await;
            latencies.push(start.elapsed());
        }
    }
    print_latency("available_slots", &mut latencies);
}

/// Many tasks racing for the same few slots of one staff member.
async fn bench_contention(engine: Arc<Engine>, staff_id: Ulid, service_id: Ulid) {
    let date = first_day() + Days::new(DAYS - 1);
    let slots = engine.available_slots(staff_id, service_id, date).await.unwrap();
    let Some(target) = slots.first().copied() else {
        println!("  contention: no free slot left");
        return;
    };

    let mut handles = Vec::with_capacity(BOOKING_TASKS);
    for i in 0..BOOKING_TASKS {
        let engine = engine.clone();
        let start = target.start + (i as i64 % 3) * 15 * MINUTE_MS;
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let result = engine
                .book_appointment(BookingRequest {
                    id: Ulid::new(),
                    staff_id,
                    service_id,
                    client_id: format!("racer-{i}"),
                    start,
                    notes: None,
                })
                .await;
            (t.elapsed(), result)
        }));
    }

    let mut latencies = Vec::with_capacity(BOOKING_TASKS);
    let (mut won, mut conflicts, mut other) = (0, 0, 0);
    for h in handles {
        let (elapsed, result) = h.await.unwrap();
        latencies.push(elapsed);
        match result {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(_) => other += 1,
        }
    }
    print_latency("contended book_appointment", &mut latencies);
    println!("    won={won}, conflicts={conflicts}, other={other}");
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join("slotd_bench");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("stress-{}.wal", Ulid::new()));

    let engine = Arc::new(
        Engine::new(path.clone(), Arc::new(NotifyHub::new()), SlotPolicy::default()).unwrap(),
    );

    println!("setup");
    let (staff, service_id) = setup(&engine).await;

    println!("prefill");
    let t = Instant::now();
    let booked = prefill(&engine, &staff, service_id).await;
    println!("  booked {booked} appointments in {:.2?}", t.elapsed());

    println!("queries");
    bench_queries(&engine, &staff, service_id).await;

    println!("contention");
    bench_contention(engine.clone(), staff[0], service_id).await;

    println!("compaction");
    let t = Instant::now();
    engine.compact_wal().await.unwrap();
    println!("  compacted in {:.2?}", t.elapsed());

    let _ = std::fs::remove_file(&path);
}
