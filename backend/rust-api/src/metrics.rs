use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, CounterVec, Encoder,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Sandbox / grading metrics
    pub static ref QUERIES_EXECUTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "queries_executed_total",
        "User statements run against a sandbox environment",
        &["dialect", "outcome"]
    )
    .unwrap();

    pub static ref QUERY_EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "query_execution_duration_seconds",
        "Wall-clock time of sandboxed statement execution",
        &["dialect"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    pub static ref ENVIRONMENTS_PROVISIONED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "environments_provisioned_total",
        "Schema provisioning outcomes per dialect",
        &["dialect", "result"]
    )
    .unwrap();

    // Ledger metrics
    pub static ref ATTEMPTS_RECORDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempts_recorded_total",
        "Graded attempts appended to the ledger",
        &["outcome"]
    )
    .unwrap();

    pub static ref HINTS_REVEALED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "hints_revealed_total",
        "Hint reveal events",
        &["first_reveal"]
    )
    .unwrap();

    // Cache Metrics (Redis)
    pub static ref CACHE_HIT_RATIO: CounterVec = register_counter_vec!(
        "cache_hit_ratio",
        "Cache hit/miss ratio",
        &["result"]
    )
    .unwrap();
}

pub fn record_cache_hit() {
    CACHE_HIT_RATIO.with_label_values(&["hit"]).inc();
}

pub fn record_cache_miss() {
    CACHE_HIT_RATIO.with_label_values(&["miss"]).inc();
}

/// Render all registered metrics in the Prometheus text format.
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_metrics_produces_text_format() {
        QUERIES_EXECUTED_TOTAL
            .with_label_values(&["postgresql", "correct"])
            .inc();
        let rendered = render_metrics().unwrap();
        assert!(rendered.contains("queries_executed_total"));
    }
}
