//! Metrics and observability handlers
//!
//! Request counters are collected by the transport; inference counters come
//! from both the transport (per endpoint outcome) and the serving core
//! (admission gate, index consistency).

use std::{
    fmt::Display,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use application::ServiceStats;
use axum::{Json, extract::State, http::header, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Metrics response containing all application metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Application metadata
    pub app: AppMetrics,
    /// Request statistics
    pub requests: RequestMetrics,
    /// Inference endpoint statistics
    pub inference: InferenceMetrics,
    /// Serving core state and counters
    pub serving: ServingMetrics,
}

/// Application metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetrics {
    pub version: String,
    pub name: String,
    pub uptime_seconds: u64,
}

/// Request statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    /// Total requests received
    pub total_requests: u64,
    /// Successful requests (2xx)
    pub success_count: u64,
    /// Client errors (4xx)
    pub client_error_count: u64,
    /// Server errors (5xx)
    pub server_error_count: u64,
    /// Requests dropped before a response was produced
    pub cancelled_count: u64,
    /// Average response time in milliseconds
    pub avg_response_time_ms: f64,
    /// Current active requests
    pub active_requests: u64,
}

/// Inference endpoint statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceMetrics {
    /// Calls to the prediction, embedding and similarity endpoints
    pub total_inferences: u64,
    pub successful_inferences: u64,
    pub failed_inferences: u64,
    /// Average endpoint time in milliseconds, waiting for a permit included
    pub avg_inference_time_ms: f64,
}

/// Serving core state and counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingMetrics {
    pub model_loaded: bool,
    pub index_loaded: bool,
    /// Forward passes executed by the model runtime
    pub model_inferences_total: u64,
    /// Average forward pass time in milliseconds
    pub avg_model_inference_ms: f64,
    pub in_flight_inferences: usize,
    pub max_concurrent_inferences: usize,
    /// Index positions without an image id, skipped at query time
    pub index_inconsistencies_total: u64,
    /// Requests rejected because the model or index was not loaded
    pub unavailable_total: u64,
}

impl ServingMetrics {
    fn new(stats: &ServiceStats, model_loaded: bool, index_loaded: bool) -> Self {
        Self {
            model_loaded,
            index_loaded,
            model_inferences_total: stats.inferences_total,
            avg_model_inference_ms: average(
                stats.inference_latency_ms_total,
                stats.inferences_total,
            ),
            in_flight_inferences: stats.in_flight_inferences,
            max_concurrent_inferences: stats.max_concurrent_inferences,
            index_inconsistencies_total: stats.index_inconsistencies_total,
            unavailable_total: stats.unavailable_total,
        }
    }
}

fn average(total: u64, count: u64) -> f64 {
    if count > 0 {
        total as f64 / count as f64
    } else {
        0.0
    }
}

/// Atomic counters for request metrics
#[derive(Debug)]
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: AtomicU64,
    success_count: AtomicU64,
    client_error_count: AtomicU64,
    server_error_count: AtomicU64,
    cancelled_count: AtomicU64,
    active_requests: AtomicU64,
    /// Total response time in microseconds
    total_response_time_us: AtomicU64,
    total_inferences: AtomicU64,
    successful_inferences: AtomicU64,
    failed_inferences: AtomicU64,
    /// Total inference endpoint time in microseconds
    total_inference_time_us: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            client_error_count: AtomicU64::new(0),
            server_error_count: AtomicU64::new(0),
            cancelled_count: AtomicU64::new(0),
            active_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            total_inferences: AtomicU64::new(0),
            successful_inferences: AtomicU64::new(0),
            failed_inferences: AtomicU64::new(0),
            total_inference_time_us: AtomicU64::new(0),
        }
    }

    /// Record start of a request
    ///
    /// The returned guard takes the request off the active gauge when dropped.
    pub fn request_start(&self) -> InFlightRequest<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        InFlightRequest {
            metrics: self,
            start: Instant::now(),
            finished: false,
        }
    }

    fn request_end(&self, response_time_us: u64, status_code: u16) {
        self.total_response_time_us
            .fetch_add(response_time_us, Ordering::Relaxed);

        match status_code {
            200..=299 => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
            },
            400..=499 => {
                self.client_error_count.fetch_add(1, Ordering::Relaxed);
            },
            500..=599 => {
                self.server_error_count.fetch_add(1, Ordering::Relaxed);
            },
            _ => {},
        }
    }

    /// Record one call to an inference endpoint
    pub fn record_inference(&self, success: bool, duration_us: u64) {
        self.total_inferences.fetch_add(1, Ordering::Relaxed);
        self.total_inference_time_us
            .fetch_add(duration_us, Ordering::Relaxed);

        if success {
            self.successful_inferences.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_inferences.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get request metrics
    #[must_use]
    pub fn request_metrics(&self) -> RequestMetrics {
        let total = self.total_requests.load(Ordering::Relaxed);
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);

        RequestMetrics {
            total_requests: total,
            success_count: self.success_count.load(Ordering::Relaxed),
            client_error_count: self.client_error_count.load(Ordering::Relaxed),
            server_error_count: self.server_error_count.load(Ordering::Relaxed),
            cancelled_count: self.cancelled_count.load(Ordering::Relaxed),
            avg_response_time_ms: average(total_time, total) / 1000.0,
            active_requests: self.active_requests.load(Ordering::Relaxed),
        }
    }

    /// Get inference endpoint metrics
    #[must_use]
    pub fn inference_metrics(&self) -> InferenceMetrics {
        let total = self.total_inferences.load(Ordering::Relaxed);
        let total_time = self.total_inference_time_us.load(Ordering::Relaxed);

        InferenceMetrics {
            total_inferences: total,
            successful_inferences: self.successful_inferences.load(Ordering::Relaxed),
            failed_inferences: self.failed_inferences.load(Ordering::Relaxed),
            avg_inference_time_ms: average(total_time, total) / 1000.0,
        }
    }
}

/// A request that has started and not yet produced a response
#[derive(Debug)]
#[must_use = "dropping the guard counts the request as cancelled"]
pub struct InFlightRequest<'a> {
    metrics: &'a MetricsCollector,
    start: Instant,
    finished: bool,
}

impl InFlightRequest<'_> {
    /// Record the response status and elapsed time
    pub fn finish(mut self, status_code: u16) {
        self.finished = true;
        let elapsed_us = self.start.elapsed().as_micros() as u64;
        self.metrics.request_end(elapsed_us, status_code);
    }
}

impl Drop for InFlightRequest<'_> {
    fn drop(&mut self) {
        self.metrics.active_requests.fetch_sub(1, Ordering::Relaxed);
        if !self.finished {
            self.metrics.cancelled_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn collect(state: &AppState) -> MetricsResponse {
    let metrics = state.metrics.as_ref();
    let status = state.species_service.status();
    let stats = state.species_service.stats();

    MetricsResponse {
        app: AppMetrics {
            version: env!("CARGO_PKG_VERSION").to_string(),
            name: env!("CARGO_PKG_NAME").to_string(),
            uptime_seconds: metrics.uptime_seconds(),
        },
        requests: metrics.request_metrics(),
        inference: metrics.inference_metrics(),
        serving: ServingMetrics::new(&stats, status.model_loaded, status.index_loaded),
    }
}

/// Get metrics endpoint
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(collect(&state))
}

/// Prometheus-style metrics endpoint
pub async fn get_metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = collect(&state);
    let samples: [(&str, &str, &str, String); 20] = [
        (
            "app_uptime_seconds",
            "Application uptime in seconds",
            "counter",
            m.app.uptime_seconds.to_string(),
        ),
        (
            "http_requests_total",
            "Total HTTP requests",
            "counter",
            m.requests.total_requests.to_string(),
        ),
        (
            "http_requests_success_total",
            "Successful HTTP requests",
            "counter",
            m.requests.success_count.to_string(),
        ),
        (
            "http_requests_client_error_total",
            "Client error HTTP requests",
            "counter",
            m.requests.client_error_count.to_string(),
        ),
        (
            "http_requests_server_error_total",
            "Server error HTTP requests",
            "counter",
            m.requests.server_error_count.to_string(),
        ),
        (
            "http_requests_cancelled_total",
            "HTTP requests dropped before responding",
            "counter",
            m.requests.cancelled_count.to_string(),
        ),
        (
            "http_requests_active",
            "Current active HTTP requests",
            "gauge",
            m.requests.active_requests.to_string(),
        ),
        (
            "http_response_time_avg_ms",
            "Average response time in milliseconds",
            "gauge",
            format!("{:.2}", m.requests.avg_response_time_ms),
        ),
        (
            "inference_requests_total",
            "Total inference endpoint calls",
            "counter",
            m.inference.total_inferences.to_string(),
        ),
        (
            "inference_requests_success_total",
            "Successful inference endpoint calls",
            "counter",
            m.inference.successful_inferences.to_string(),
        ),
        (
            "inference_requests_failed_total",
            "Failed inference endpoint calls",
            "counter",
            m.inference.failed_inferences.to_string(),
        ),
        (
            "inference_time_avg_ms",
            "Average inference endpoint time in milliseconds",
            "gauge",
            format!("{:.2}", m.inference.avg_inference_time_ms),
        ),
        (
            "model_loaded",
            "Whether a model is loaded",
            "gauge",
            i32::from(m.serving.model_loaded).to_string(),
        ),
        (
            "embedding_index_loaded",
            "Whether an embedding index is loaded",
            "gauge",
            i32::from(m.serving.index_loaded).to_string(),
        ),
        (
            "model_inferences_total",
            "Forward passes executed",
            "counter",
            m.serving.model_inferences_total.to_string(),
        ),
        (
            "model_inference_time_avg_ms",
            "Average forward pass time in milliseconds",
            "gauge",
            format!("{:.2}", m.serving.avg_model_inference_ms),
        ),
        (
            "inferences_in_flight",
            "Inferences currently holding a permit",
            "gauge",
            m.serving.in_flight_inferences.to_string(),
        ),
        (
            "inferences_max_concurrent",
            "Admission gate capacity",
            "gauge",
            m.serving.max_concurrent_inferences.to_string(),
        ),
        (
            "index_inconsistencies_total",
            "Index positions without an image id",
            "counter",
            m.serving.index_inconsistencies_total.to_string(),
        ),
        (
            "service_unavailable_total",
            "Requests rejected while artifacts were missing",
            "counter",
            m.serving.unavailable_total.to_string(),
        ),
    ];

    let mut output = String::new();
    for (name, help, kind, value) in &samples {
        push_metric(&mut output, name, help, kind, value);
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}

fn push_metric(out: &mut String, name: &str, help: &str, kind: &str, value: impl Display) {
    out.push_str(&format!(
        "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_collector_default() {
        let collector = MetricsCollector::default();
        let metrics = collector.request_metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_count, 0);
        assert_eq!(metrics.active_requests, 0);
    }

    #[test]
    fn request_start_increments_active_until_finished() {
        let collector = MetricsCollector::new();
        let request = collector.request_start();
        assert_eq!(collector.request_metrics().active_requests, 1);

        request.finish(200);
        let metrics = collector.request_metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.active_requests, 0);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.cancelled_count, 0);
    }

    #[test]
    fn statuses_are_classified() {
        let collector = MetricsCollector::new();
        collector.request_start().finish(201);
        collector.request_start().finish(422);
        collector.request_start().finish(503);
        collector.request_start().finish(301);

        let metrics = collector.request_metrics();
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.client_error_count, 1);
        assert_eq!(metrics.server_error_count, 1);
    }

    #[test]
    fn dropped_request_counts_as_cancelled() {
        let collector = MetricsCollector::new();
        {
            let _request = collector.request_start();
        }
        let metrics = collector.request_metrics();
        assert_eq!(metrics.active_requests, 0);
        assert_eq!(metrics.cancelled_count, 1);
        assert_eq!(metrics.success_count, 0);
    }

    #[test]
    fn inference_outcomes_and_average() {
        let collector = MetricsCollector::new();
        collector.record_inference(true, 2_000);
        collector.record_inference(false, 4_000);

        let metrics = collector.inference_metrics();
        assert_eq!(metrics.total_inferences, 2);
        assert_eq!(metrics.successful_inferences, 1);
        assert_eq!(metrics.failed_inferences, 1);
        assert!((metrics.avg_inference_time_ms - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn averages_are_zero_without_samples() {
        let collector = MetricsCollector::new();
        assert!(collector.request_metrics().avg_response_time_ms.abs() < f64::EPSILON);
        assert!(collector.inference_metrics().avg_inference_time_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn serving_metrics_from_stats() {
        let stats = ServiceStats {
            inferences_total: 4,
            inference_latency_ms_total: 10,
            index_inconsistencies_total: 1,
            unavailable_total: 2,
            in_flight_inferences: 0,
            max_concurrent_inferences: 8,
        };
        let serving = ServingMetrics::new(&stats, true, false);
        assert!(serving.model_loaded);
        assert!(!serving.index_loaded);
        assert!((serving.avg_model_inference_ms - 2.5).abs() < f64::EPSILON);
        assert_eq!(serving.max_concurrent_inferences, 8);
    }

    #[test]
    fn prometheus_line_format() {
        let mut out = String::new();
        push_metric(&mut out, "x_total", "An example", "counter", 3);
        assert_eq!(
            out,
            "# HELP x_total An example\n# TYPE x_total counter\nx_total 3\n\n"
        );
    }
}
