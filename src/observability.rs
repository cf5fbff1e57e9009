use std::net::SocketAddr;

use crate::protocol::Command;

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "roomd_bookings_committed_total";

/// Counter: reservations committed as part of a booking.
pub const RESERVATIONS_COMMITTED_TOTAL: &str = "roomd_reservations_committed_total";

/// Counter: rejected scheduling attempts. Labels: kind.
pub const REJECTIONS_TOTAL: &str = "roomd_rejections_total";

/// Counter: reservations moved.
pub const RESCHEDULES_TOTAL: &str = "roomd_reschedules_total";

/// Counter: bookings deleted.
pub const BOOKINGS_DELETED_TOTAL: &str = "roomd_bookings_deleted_total";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: op, status.
pub const COMMANDS_TOTAL: &str = "roomd_commands_total";

/// Histogram: command latency in seconds. Labels: op.
pub const COMMAND_DURATION_SECONDS: &str = "roomd_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomd_connections_rejected_total";

/// Histogram: WAL append + fsync duration per transaction, in seconds.
pub const WAL_COMMIT_DURATION_SECONDS: &str = "roomd_wal_commit_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateRoom { .. } => "create_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SetAvailability { .. } => "set_availability",
        Command::SetRestriction { .. } => "set_restriction",
        Command::Schedule { .. } => "schedule",
        Command::CheckBatch { .. } => "check_batch",
        Command::Reschedule { .. } => "reschedule",
        Command::AttachReference { .. } => "attach_reference",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::GetRoom { .. } => "get_room",
        Command::ListRooms { .. } => "list_rooms",
        Command::ListReservations { .. } => "list_reservations",
        Command::GetBooking { .. } => "get_booking",
        Command::ListBookings { .. } => "list_bookings",
        Command::AllowedRange { .. } => "allowed_range",
        Command::OpenSlots { .. } => "open_slots",
        Command::Watch { .. } => "watch",
        Command::Unwatch { .. } => "unwatch",
    }
}
