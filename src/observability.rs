use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking commits. Labels: mode, status.
pub const BOOKINGS_TOTAL: &str = "slotbook_bookings_total";

/// Histogram: booking commit latency in seconds. Labels: mode.
pub const BOOKING_DURATION_SECONDS: &str = "slotbook_booking_duration_seconds";

/// Counter: two-step bookings whose participant attach failed.
pub const PARTIAL_BOOKINGS_TOTAL: &str = "slotbook_partial_bookings_total";

/// Counter: compensating deletes after a partial booking. Labels: outcome.
pub const COMPENSATIONS_TOTAL: &str = "slotbook_compensations_total";

/// Counter: day availability grids computed.
pub const DAY_PLANS_TOTAL: &str = "slotbook_day_plans_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of open business stores.
pub const TENANTS_ACTIVE: &str = "slotbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
