//! Prometheus metrics setup and metric definitions

use anyhow::{Context, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    // Permission checks are expected well under 10ms; keep resolution below that.
    let buckets = vec![
        0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(&buckets)
        .context("failed to set histogram buckets")?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Register metric descriptions and emit initial zero values so HELP/TYPE
/// lines are present from startup.
pub fn describe_metrics() {
    // HTTP
    describe_counter!(
        "gatekeeper_http_requests_total",
        "Total number of HTTP requests"
    );
    describe_histogram!(
        "gatekeeper_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        "gatekeeper_http_requests_in_flight",
        "Number of HTTP requests currently being processed"
    );

    // Resolution
    describe_counter!(
        "gatekeeper_permission_checks_total",
        "Permission checks by result (granted/denied/error)"
    );
    describe_histogram!(
        "gatekeeper_permission_check_duration_seconds",
        "End-to-end permission check latency in seconds"
    );
    describe_counter!(
        "gatekeeper_store_errors_total",
        "Permission store reads that failed during resolution"
    );

    // Cache
    describe_counter!(
        "gatekeeper_cache_lookups_total",
        "Cache lookups by tier and result (hit/miss)"
    );
    describe_counter!(
        "gatekeeper_cache_tier_errors_total",
        "Cache tier operations that failed and were degraded around"
    );
    describe_counter!(
        "gatekeeper_cache_invalidations_total",
        "Cache evictions by triggering reason"
    );

    counter!("gatekeeper_permission_checks_total", "result" => "granted").absolute(0);
    counter!("gatekeeper_permission_checks_total", "result" => "denied").absolute(0);
    counter!("gatekeeper_permission_checks_total", "result" => "error").absolute(0);
    histogram!("gatekeeper_permission_check_duration_seconds").record(0.0);
    counter!("gatekeeper_store_errors_total", "operation" => "find_membership").absolute(0);
    counter!("gatekeeper_cache_lookups_total", "tier" => "local", "result" => "hit").absolute(0);
    counter!("gatekeeper_cache_lookups_total", "tier" => "local", "result" => "miss").absolute(0);
    counter!("gatekeeper_cache_invalidations_total", "reason" => "peer").absolute(0);
    gauge!("gatekeeper_http_requests_in_flight").set(0.0);
}
