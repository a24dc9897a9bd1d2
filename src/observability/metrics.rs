//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define reconciliation metrics (contact, render, validation, write, cache, reload)
//! - Expose Prometheus-compatible metrics endpoint
//! - Label every series by manager and, where meaningful, repo/file
//!
//! # Metrics
//! - `butler_remoterepo_contact_success` (gauge): 1=fetched, 0=failed
//! - `butler_remoterepo_contact_retries_total` (counter)
//! - `butler_localconfig_render_success` (gauge)
//! - `butler_remoterepo_valid` (gauge): fragment passed validation
//! - `butler_localconfig_write_success` (gauge)
//! - `butler_cache_restore_total` / `butler_cache_snapshot_total` (counters)
//! - `butler_reload_success` (gauge), `butler_reload_total`, `butler_reload_retries_total` (counters)
//! - `butler_repo_up`, `butler_repo_sanity`, `butler_repo_in_sync` (gauges)
//! - `butler_pass_duration_seconds` (histogram)
//!
//! # Design Decisions
//! - The recorder is a process-wide singleton; the engine only calls these hooks
//! - Without an installed recorder every hook is a no-op (tests, `--once`)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

fn flag(ok: bool) -> f64 {
    if ok {
        1.0
    } else {
        0.0
    }
}

/// Outcome of downloading one fragment.
pub fn record_contact(manager: &str, repo: &str, file: &str, ok: bool) {
    gauge!(
        "butler_remoterepo_contact_success",
        "manager" => manager.to_string(),
        "repo" => repo.to_string(),
        "file" => file.to_string()
    )
    .set(flag(ok));
}

/// Extra attempts spent downloading one fragment.
pub fn record_contact_retries(manager: &str, repo: &str, retries: u32) {
    if retries == 0 {
        return;
    }
    counter!(
        "butler_remoterepo_contact_retries_total",
        "manager" => manager.to_string(),
        "repo" => repo.to_string()
    )
    .increment(u64::from(retries));
}

pub fn record_render(manager: &str, file: &str, ok: bool) {
    gauge!(
        "butler_localconfig_render_success",
        "manager" => manager.to_string(),
        "file" => file.to_string()
    )
    .set(flag(ok));
}

pub fn record_validation(manager: &str, file: &str, ok: bool) {
    gauge!(
        "butler_remoterepo_valid",
        "manager" => manager.to_string(),
        "file" => file.to_string()
    )
    .set(flag(ok));
}

pub fn record_write(manager: &str, file: &str, ok: bool) {
    gauge!(
        "butler_localconfig_write_success",
        "manager" => manager.to_string(),
        "file" => file.to_string()
    )
    .set(flag(ok));
}

/// A known-good restore ("restored"), clean ("cleaned") or no-op ("left").
pub fn record_cache_restore(manager: &str, action: &'static str) {
    counter!(
        "butler_cache_restore_total",
        "manager" => manager.to_string(),
        "action" => action
    )
    .increment(1);
}

pub fn record_cache_snapshot(manager: &str) {
    counter!("butler_cache_snapshot_total", "manager" => manager.to_string()).increment(1);
}

pub fn record_reload(manager: &str, ok: bool) {
    counter!("butler_reload_total", "manager" => manager.to_string()).increment(1);
    gauge!("butler_reload_success", "manager" => manager.to_string()).set(flag(ok));
}

pub fn record_reload_retry(manager: &str) {
    counter!("butler_reload_retries_total", "manager" => manager.to_string()).increment(1);
}

pub fn record_repo_up(manager: &str, repo: &str, up: bool) {
    gauge!(
        "butler_repo_up",
        "manager" => manager.to_string(),
        "repo" => repo.to_string()
    )
    .set(flag(up));
}

/// Every fragment of the manager was fetched and validated.
pub fn record_repo_sanity(manager: &str, ok: bool) {
    gauge!("butler_repo_sanity", "manager" => manager.to_string()).set(flag(ok));
}

/// Local files match the remote set after this pass.
pub fn record_repo_in_sync(manager: &str, in_sync: bool) {
    gauge!("butler_repo_in_sync", "manager" => manager.to_string()).set(flag(in_sync));
}

pub fn record_pass_duration(manager: &str, start: Instant) {
    histogram!("butler_pass_duration_seconds", "manager" => manager.to_string())
        .record(start.elapsed().as_secs_f64());
}
