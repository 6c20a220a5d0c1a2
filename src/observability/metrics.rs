use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the ledger engine. Without an installed recorder
/// every call is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }

    pub fn record_group_committed(&self, namespace: &str, transactions: usize, entries: usize) {
        counter!("ledger_groups_committed_total", "namespace" => namespace.to_string()).increment(1);
        counter!("ledger_transactions_booked_total", "namespace" => namespace.to_string())
            .increment(transactions as u64);
        counter!("ledger_entries_booked_total", "namespace" => namespace.to_string())
            .increment(entries as u64);
    }

    pub fn record_commit_failed(&self, reason: &str) {
        counter!("ledger_commit_failures_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_commit_latency(&self, duration_ms: f64) {
        histogram!("ledger_commit_duration_ms").record(duration_ms);
    }

    pub fn record_lock_wait(&self, duration_ms: f64, locks: usize) {
        histogram!("ledger_lock_wait_duration_ms").record(duration_ms);
        histogram!("ledger_locks_per_commit").record(locks as f64);
    }

    pub fn record_balance_query_latency(&self, duration_ms: f64) {
        histogram!("ledger_balance_query_duration_ms").record(duration_ms);
    }

    pub fn record_accounts_provisioned(&self, kind: &str, created: usize) {
        counter!("ledger_accounts_provisioned_total", "kind" => kind.to_string()).increment(created as u64);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("ledger_groups_committed_total", Unit::Count, "Transaction groups committed");
    describe_counter!("ledger_transactions_booked_total", Unit::Count, "Transactions booked");
    describe_counter!("ledger_entries_booked_total", Unit::Count, "Entries booked");
    describe_counter!("ledger_commit_failures_total", Unit::Count, "Failed commits by reason");
    describe_histogram!("ledger_commit_duration_ms", Unit::Milliseconds, "Commit latency in milliseconds");
    describe_histogram!("ledger_lock_wait_duration_ms", Unit::Milliseconds, "Time spent acquiring account locks");
    describe_histogram!("ledger_locks_per_commit", Unit::Count, "Account locks taken per commit");
    describe_histogram!("ledger_balance_query_duration_ms", Unit::Milliseconds, "Balance query latency in milliseconds");
    describe_counter!("ledger_accounts_provisioned_total", Unit::Count, "Accounts created by provisioning");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
