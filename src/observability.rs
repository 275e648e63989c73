use std::net::SocketAddr;

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: reservation mutations. Labels: action, outcome.
pub const RESERVATIONS_TOTAL: &str = "novodom_reservations_total";

/// Counter: requests, accepts and reschedules rejected for overlap.
pub const CONFLICTS_TOTAL: &str = "novodom_conflicts_total";

/// Histogram: availability query latency in seconds. Labels: query.
pub const QUERY_DURATION_SECONDS: &str = "novodom_query_duration_seconds";

/// Counter: reservations moved to `completed` by the sweeper.
pub const STAYS_COMPLETED_TOTAL: &str = "novodom_stays_completed_total";

/// Gauge: number of properties loaded.
pub const PROPERTIES_ACTIVE: &str = "novodom_properties_active";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "novodom_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "novodom_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the process keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}
