use std::net::SocketAddr;
use tracing::{info, warn};

pub const RECORDS_FETCHED_TOTAL: &str = "epi_records_fetched_total";
pub const RECORDS_ACCEPTED_TOTAL: &str = "epi_records_accepted_total";
pub const RECORDS_REJECTED_TOTAL: &str = "epi_records_rejected_total";
pub const REGION_FAILURES_TOTAL: &str = "epi_region_failures_total";
pub const REGION_RUN_DURATION_SECONDS: &str = "epi_region_run_duration_seconds";

/// Installs the Prometheus exporter on `port`. Without an installed recorder the
/// `metrics` macros are no-ops, so callers skip this when no port is configured.
pub fn init_metrics(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}
