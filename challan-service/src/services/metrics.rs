//! Prometheus export and the payment counters recorded against it.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder.
///
/// Safe to call more than once: later calls, and a failed install because
/// another recorder is already set, only log.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
        }
    }
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// `status` is `created` or `failed`.
pub fn record_order(status: &'static str) {
    metrics::counter!("payment_orders_total", "status" => status).increment(1);
}

/// `outcome` is `verified`, `rejected` or `duplicate`.
pub fn record_verification(outcome: &'static str) {
    metrics::counter!("payment_verifications_total", "outcome" => outcome).increment(1);
}

/// `outcome` is `recorded`, `reconciled`, `outboxed` or `lost`.
pub fn record_ledger_write(outcome: &'static str) {
    metrics::counter!("ledger_writes_total", "outcome" => outcome).increment(1);
}

pub fn record_challans_paid(count: u64) {
    metrics::counter!("challans_marked_paid_total").increment(count);
}

pub fn record_challan_mismatch() {
    metrics::counter!("challan_update_mismatch_total").increment(1);
}

/// `status` is `enqueued`, `replayed`, `failed` or `parked`.
pub fn record_outbox(status: &'static str) {
    metrics::counter!("outbox_entries_total", "status" => status).increment(1);
}

/// A `Recorded` payment dropped from the sweep after too many misses.
pub fn record_sweep_parked() {
    metrics::counter!("reconcile_sweep_parked_total").increment(1);
}

/// Times one store operation into `db_query_duration_seconds`.
pub struct QueryTimer {
    operation: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn observe_duration(self) {
        metrics::histogram!("db_query_duration_seconds", "operation" => self.operation)
            .record(self.start.elapsed().as_secs_f64());
    }
}
