// ============================================================================
// Prometheus Metrics
// ============================================================================
//
// HTTP:
//   vendor_sync_http_request_duration_seconds{method,path,status}
//   vendor_sync_http_requests_total{method,path,status}
//   vendor_sync_http_connections_active
//
// Sync engine:
//   vendor_sync_runs_total{status}
//   vendor_sync_records_total{outcome}
//   vendor_sync_connection_tests_total{result}
//
// Scraped from GET /metrics.
//
// ============================================================================

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder, GaugeVec,
    HistogramVec, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "vendor_sync_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "vendor_sync_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    ).unwrap();

    pub static ref HTTP_CONNECTIONS_ACTIVE: GaugeVec = register_gauge_vec!(
        "vendor_sync_http_connections_active",
        "Number of active HTTP connections",
        &[]
    ).unwrap();

    /// Completed sync runs by final status (success, partial, failed)
    pub static ref SYNC_RUNS_TOTAL: CounterVec = register_counter_vec!(
        "vendor_sync_runs_total",
        "Total number of completed sync runs",
        &["status"]
    ).unwrap();

    /// Per-record outcomes across all runs (created, updated, unchanged, failed)
    pub static ref SYNC_RECORDS_TOTAL: CounterVec = register_counter_vec!(
        "vendor_sync_records_total",
        "Vendor records processed by sync runs",
        &["outcome"]
    ).unwrap();

    pub static ref CONNECTION_TESTS_TOTAL: CounterVec = register_counter_vec!(
        "vendor_sync_connection_tests_total",
        "ERP connection tests by result",
        &["result"]
    ).unwrap();
}

/// Collapse path parameters so label cardinality stays bounded.
///
/// /api/companies/acme/vendors/0A1B2C3D-4E5F6071 -> /api/companies/:company_id/vendors/:vendor_id
fn normalize_path(path: &str) -> String {
    let mut normalized: Vec<&str> = Vec::new();
    let mut previous = "";

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let replacement = match previous {
            "companies" => ":company_id",
            "vendors" => ":vendor_id",
            "fields" => ":field",
            "field-groups" => ":group",
            _ => segment,
        };
        normalized.push(replacement);
        previous = segment;
    }

    format!("/{}", normalized.join("/"))
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    HTTP_CONNECTIONS_ACTIVE.with_label_values(&[]).inc();

    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path, &status])
        .observe(duration.as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();
    HTTP_CONNECTIONS_ACTIVE.with_label_values(&[]).dec();

    tracing::debug!(
        target: "metrics",
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %duration.as_millis(),
        "HTTP request completed"
    );

    response
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];

    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                b"Failed to encode metrics".to_vec(),
            )
        }
    }
}

// ============================================================================
// Sync engine helpers
// ============================================================================

pub fn record_sync_run(status: &str, created: usize, updated: usize, unchanged: usize, failed: usize) {
    SYNC_RUNS_TOTAL.with_label_values(&[status]).inc();
    for (outcome, count) in [
        ("created", created),
        ("updated", updated),
        ("unchanged", unchanged),
        ("failed", failed),
    ] {
        if count > 0 {
            SYNC_RECORDS_TOTAL.with_label_values(&[outcome]).inc_by(count as f64);
        }
    }
}

pub fn record_connection_test(succeeded: bool) {
    let result = if succeeded { "success" } else { "error" };
    CONNECTION_TESTS_TOTAL.with_label_values(&[result]).inc();
}
