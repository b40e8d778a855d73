//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_commits_total` (counter): committed changes by `source` (api, file, refresh)
//! - `config_restores_total` (counter): successful `restore()` calls
//! - `config_quarantines_total` (counter): unreadable files moved aside
//! - `listener_restarts_total` (counter): restarts by `listener`, `outcome` (ok, failed)
//! - `listener_rollbacks_total` (counter): configuration rollbacks by `listener`
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint enabled");
    Ok(())
}

pub fn record_config_commit(source: &'static str) {
    ::metrics::counter!("config_commits_total", "source" => source).increment(1);
}

pub fn record_config_restore() {
    ::metrics::counter!("config_restores_total").increment(1);
}

pub fn record_config_quarantine() {
    ::metrics::counter!("config_quarantines_total").increment(1);
}

pub fn record_listener_restart(listener: &str, outcome: &'static str) {
    ::metrics::counter!(
        "listener_restarts_total",
        "listener" => listener.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_listener_rollback(listener: &str) {
    ::metrics::counter!("listener_rollbacks_total", "listener" => listener.to_string()).increment(1);
}
