use lazy_static::lazy_static;
use log::{info, warn};
use prometheus::{labels, register_gauge, Gauge};

use tlsbatch::RunSummary;

lazy_static! {
    static ref TLSBATCH_HOSTS_CHECKED: Gauge =
        register_gauge!("tlsbatch_hosts_checked", "hosts checked in the last run").unwrap();
    static ref TLSBATCH_HOSTS_OK: Gauge =
        register_gauge!("tlsbatch_hosts_ok", "hosts with a reachable, unexpired certificate")
            .unwrap();
    static ref TLSBATCH_HOSTS_BAD: Gauge =
        register_gauge!("tlsbatch_hosts_bad", "hosts that failed the check").unwrap();
    static ref TLSBATCH_RUN_DURATION_SECONDS: Gauge = register_gauge!(
        "tlsbatch_run_duration_seconds",
        "wall time of the last run"
    )
    .unwrap();
}

/// Pushes the run counters to a Prometheus Push Gateway.
///
/// # Arguments
/// * `summary` - counters of the finished run
/// * `prometheus_address` - push gateway base address
///
/// Push failures are logged and otherwise ignored.
pub fn prometheus_metrics(summary: &RunSummary, prometheus_address: &str) {
    TLSBATCH_HOSTS_CHECKED.set(summary.dispatched as f64);
    TLSBATCH_HOSTS_OK.set(summary.ok as f64);
    TLSBATCH_HOSTS_BAD.set(summary.bad as f64);
    TLSBATCH_RUN_DURATION_SECONDS.set(summary.elapsed_ms as f64 / 1000.0);

    let metric_families = prometheus::gather();
    let pushed = prometheus::push_metrics(
        "tlsbatch",
        labels! {
            "instance".to_owned() => "tlsbatch".to_owned(),
        },
        prometheus_address,
        metric_families,
        None,
    );

    match pushed {
        Ok(_) => info!("Pushed run metrics to {}", prometheus_address),
        Err(e) => warn!("Failed to push metrics to prometheus: {}", e),
    }
}
