use crate::model::*;

use super::availability::merge_overlapping;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

pub(crate) fn validate_instant(at: Ms) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Occupied intervals of one staff member inside `day`: every appointment
/// that is not cancelled, including one that started the previous day and
/// runs past midnight. Sorted and merged, since racing writers may have left
/// overlaps behind.
pub fn occupied_intervals(rs: &StaffState, day: &Span) -> Vec<Span> {
    let mut occupied: Vec<Span> = rs
        .overlapping(day)
        .filter(|a| a.status.occupies())
        .map(Appointment::span)
        .collect();
    occupied.sort_by_key(|s| s.start);
    merge_overlapping(&occupied)
}

/// Any occupying appointment overlapping `span` is a conflict.
pub(crate) fn check_no_conflict(rs: &StaffState, span: &Span) -> Result<(), EngineError> {
    match rs
        .overlapping(span)
        .find(|a| a.status.occupies())
    {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use ulid::Ulid;

    const M: Ms = MINUTE_MS;

    fn staff_with(appts: &[(Ms, u32, AppointmentStatus)]) -> StaffState {
        let mut rs = StaffState::new(Ulid::new(), "Ada".into(), Tz::UTC);
        for &(start, minutes, status) in appts {
            rs.insert_appointment(Appointment {
                id: Ulid::new(),
                staff_id: rs.id,
                service_id: Ulid::new(),
                client_id: "c".into(),
                start,
                duration_minutes: minutes,
                status,
                notes: None,
                created_at: 0,
            });
        }
        rs
    }

    #[test]
    fn cancelled_appointments_do_not_occupy() {
        use AppointmentStatus::*;
        let rs = staff_with(&[
            (60 * M, 30, Confirmed),
            (120 * M, 30, Cancelled),
            (180 * M, 30, NoShow),
            (240 * M, 30, Completed),
            (300 * M, 30, Pending),
        ]);
        let day = Span::new(0, 24 * 60 * M);
        let occupied = occupied_intervals(&rs, &day);
        assert_eq!(
            occupied,
            vec![
                Span::new(60 * M, 90 * M),
                Span::new(180 * M, 210 * M),
                Span::new(240 * M, 270 * M),
                Span::new(300 * M, 330 * M),
            ]
        );
    }

    #[test]
    fn overlapping_appointments_are_merged() {
        use AppointmentStatus::*;
        let rs = staff_with(&[(60 * M, 60, Confirmed), (90 * M, 60, Pending)]);
        let day = Span::new(0, 24 * 60 * M);
        assert_eq!(occupied_intervals(&rs, &day), vec![Span::new(60 * M, 150 * M)]);
    }

    #[test]
    fn previous_day_spillover_blocks() {
        use AppointmentStatus::*;
        let day_len = 24 * 60 * M;
        // 23:30 yesterday for 90 minutes ends at 01:00 today.
        let rs = staff_with(&[(day_len - 30 * M, 90, Confirmed)]);
        let today = Span::new(day_len, 2 * day_len);
        let occupied = occupied_intervals(&rs, &today);
        assert_eq!(occupied.len(), 1);
        assert_eq!(occupied[0].end, day_len + 60 * M);
    }

    #[test]
    fn conflict_names_blocking_appointment() {
        use AppointmentStatus::*;
        let rs = staff_with(&[(60 * M, 60, Cancelled), (60 * M, 60, Confirmed)]);
        let confirmed_id = rs
            .appointments
            .iter()
            .find(|a| a.status == Confirmed)
            .unwrap()
            .id;
        let err = check_no_conflict(&rs, &Span::new(90 * M, 150 * M)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(id) if id == confirmed_id));
        assert!(check_no_conflict(&rs, &Span::new(120 * M, 150 * M)).is_ok());
    }

    #[test]
    fn timestamp_range() {
        assert!(validate_instant(0).is_err());
        assert!(validate_instant(1_750_000_000_000).is_ok());
    }
}
