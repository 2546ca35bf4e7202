use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations executed. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "bookings_operations_total";

/// Histogram: engine operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "bookings_operation_duration_seconds";

/// Counter: committed reservations.
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "bookings_reservations_committed_total";

/// Counter: commits refused because the room was taken. Labels: stage (recheck, insert).
pub const COMMIT_CONFLICTS_TOTAL: &str = "bookings_commit_conflicts_total";

/// Counter: calendar day changes written. Labels: action (block, unblock).
pub const CALENDAR_CHANGES_TOTAL: &str = "bookings_calendar_changes_total";

/// Counter: calendar day changes refused. Labels: reason.
pub const CALENDAR_FAILURES_TOTAL: &str = "bookings_calendar_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live sessions.
pub const SESSIONS_ACTIVE: &str = "bookings_sessions_active";

/// Counter: sessions dropped by the sweeper.
pub const SESSIONS_EXPIRED_TOTAL: &str = "bookings_sessions_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookings_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookings_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "bookings_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record one engine operation's outcome and latency.
pub fn record_operation<T, E>(op: &'static str, start: std::time::Instant, result: &Result<T, E>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
}
