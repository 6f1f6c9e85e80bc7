use crate::model::*;

use super::window::DayPlan;
use super::EngineError;

// ── Slot generation ───────────────────────────────────────────────

/// Produce every bookable slot of `duration` on a resolved day.
///
/// Candidates start at `window.start` and advance by `step`; a candidate
/// `[t, t + duration)` survives iff it ends inside the window, intersects no
/// break or occupied interval, and `t >= earliest_start` (now plus lead time).
/// Blocked intervals are merged once and walked with a single cursor, so the
/// whole pass is linear in candidates plus blocked intervals.
pub fn generate_slots(
    plan: &DayPlan,
    occupied: &[Span],
    duration: Ms,
    step: Ms,
    earliest_start: Ms,
) -> Result<Vec<Span>, EngineError> {
    if duration <= 0 {
        return Err(EngineError::invalid("service duration must be positive"));
    }
    if step <= 0 {
        return Err(EngineError::invalid("slot step must be positive"));
    }
    let DayPlan::Working { window, breaks } = plan else {
        return Ok(Vec::new());
    };

    let mut blocked: Vec<Span> = breaks.iter().chain(occupied).copied().collect();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);

    let mut slots = Vec::new();
    let mut bi = 0;
    let mut t = window.start;
    while t + duration <= window.end {
        let candidate = Span::new(t, t + duration);
        while bi < blocked.len() && blocked[bi].end <= candidate.start {
            bi += 1;
        }
        let hit = blocked.get(bi).is_some_and(|b| b.start < candidate.end);
        if !hit && t >= earliest_start {
            slots.push(candidate);
        }
        t += step;
    }

    Ok(slots)
}

// ── Interval arithmetic ───────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
