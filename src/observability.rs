use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "slotd_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "slotd_http_request_duration_seconds";

/// Counter: engine errors surfaced to clients. Labels: kind.
pub const ENGINE_ERRORS_TOTAL: &str = "slotd_engine_errors_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: availability computations answered.
pub const SLOT_QUERIES_TOTAL: &str = "slotd_slot_queries_total";

/// Counter: appointments booked.
pub const BOOKINGS_TOTAL: &str = "slotd_bookings_total";

/// Counter: bookings rejected because the interval was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotd_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotd_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(
    port: Option<u16>,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map an engine error to a short label for metrics.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::InvalidRequest(_) => "invalid_request",
        EngineError::NotFound(..) => "not_found",
        EngineError::AlreadyExists(_) => "already_exists",
        EngineError::Conflict(_) => "conflict",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "wal_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn labels_are_distinct() {
        let errors = [
            EngineError::InvalidRequest("x".into()),
            EngineError::NotFound("staff", Ulid::nil()),
            EngineError::AlreadyExists(Ulid::nil()),
            EngineError::Conflict(Ulid::nil()),
            EngineError::LimitExceeded("x"),
            EngineError::WalError("x".into()),
        ];
        let mut labels: Vec<_> = errors.iter().map(error_label).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), errors.len());
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
