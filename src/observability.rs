use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: RPC requests handled. Labels: pattern, status.
pub const RPC_REQUESTS_TOTAL: &str = "salonbook_rpc_requests_total";

/// Histogram: RPC latency in seconds. Labels: pattern.
pub const RPC_DURATION_SECONDS: &str = "salonbook_rpc_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "salonbook_bookings_created_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "salonbook_bookings_cancelled_total";

/// Counter: create or reschedule attempts rejected for overlapping a booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "salonbook_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "salonbook_connections_active";

pub const CONNECTIONS_TOTAL: &str = "salonbook_connections_total";

/// Counter: connections refused at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "salonbook_connections_rejected_total";

/// Gauge: tenants with an open engine.
pub const TENANTS_ACTIVE: &str = "salonbook_tenants_active";

pub const WAL_FLUSH_DURATION_SECONDS: &str = "salonbook_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "salonbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
