use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: assignments created (walk-ins included).
pub const ASSIGNMENTS_CREATED_TOTAL: &str = "seatline_assignments_created_total";

/// Counter: reserved → seated transitions, plus walk-ins seated on creation.
pub const ASSIGNMENTS_SEATED_TOTAL: &str = "seatline_assignments_seated_total";

/// Counter: assignments finished.
pub const ASSIGNMENTS_FINISHED_TOTAL: &str = "seatline_assignments_finished_total";

/// Counter: assignments cancelled.
pub const ASSIGNMENTS_CANCELLED_TOTAL: &str = "seatline_assignments_cancelled_total";

/// Counter: bookings rejected because the window overlaps an active assignment.
pub const SCHEDULING_CONFLICTS_TOTAL: &str = "seatline_scheduling_conflicts_total";

/// Counter: seating desk rejections. Labels: reason.
pub const DESK_REJECTIONS_TOTAL: &str = "seatline_desk_rejections_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "seatline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "seatline_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "seatline_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
