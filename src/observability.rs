use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bookdesk_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bookdesk_query_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings committed to the store.
pub const BOOKINGS_CREATED_TOTAL: &str = "bookdesk_bookings_created_total";

/// Counter: validation failures. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "bookdesk_bookings_rejected_total";

pub const BOOKINGS_DELETED_TOTAL: &str = "bookdesk_bookings_deleted_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bookdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bookdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookdesk_connections_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectBookings { .. } => "select_bookings",
        Command::InsertBookings { requests } if requests.len() > 1 => "batch_insert_bookings",
        Command::InsertBookings { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectValidation { .. } => "select_validation",
        Command::SelectResourceStats => "select_resource_stats",
        Command::SelectFleetSummary => "select_fleet_summary",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::SelectOverview => "select_overview",
        Command::SelectResources => "select_resources",
    }
}
