//! Prometheus export through a recorder owned by the [`crate::Monitor`].
//!
//! The recorder is local, never installed globally, so several monitors (and
//! tests) can live in one process.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tracing::warn;
use warden_core::{CircuitState, FailureKind};

use crate::metrics::{MetricsSnapshot, LATENCY_BUCKETS_SECS};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Requests dispatched (counter).
pub const REQUESTS_TOTAL: &str = "warden_requests_total";
/// Requests that produced a reply (counter).
pub const REQUESTS_SUCCESS_TOTAL: &str = "warden_requests_success_total";
/// Requests that ended in a failure (counter).
pub const REQUESTS_FAILED_TOTAL: &str = "warden_requests_failed_total";
/// Failed requests (counter, labels: kind).
pub const FAILURES_TOTAL: &str = "warden_failures_total";
/// Same-profile retries and fallback switches (counter).
pub const RETRIES_TOTAL: &str = "warden_retries_total";
/// Switches to a fallback profile (counter).
pub const FALLBACKS_TOTAL: &str = "warden_fallbacks_total";
/// Dispatches delayed by the rate limiter (counter).
pub const RATE_LIMITED_TOTAL: &str = "warden_rate_limited_total";
/// Request duration in seconds (histogram).
pub const REQUEST_DURATION_SECONDS: &str = "warden_request_duration_seconds";
/// Latency percentiles over the recent window (gauge, labels: quantile).
pub const REQUEST_LATENCY_MS: &str = "warden_request_latency_ms";
/// 0 closed, 1 half-open, 2 open (gauge).
pub const CIRCUIT_BREAKER_STATE: &str = "warden_circuit_breaker_state";

pub struct PrometheusExporter {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    /// Fresh recorder with every series registered at zero.
    pub fn new() -> Self {
        let builder = match PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION_SECONDS.to_string()), &LATENCY_BUCKETS_SECS)
        {
            Ok(builder) => builder,
            Err(e) => {
                warn!(error = %e, "duration buckets rejected, exporting a summary instead");
                PrometheusBuilder::new()
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();
        let exporter = Self { recorder, handle };
        exporter.with(|| {
            describe_counter!(REQUESTS_TOTAL, "Total requests dispatched");
            describe_counter!(REQUESTS_SUCCESS_TOTAL, "Requests that produced a reply");
            describe_counter!(REQUESTS_FAILED_TOTAL, "Requests that ended in a failure");
            describe_counter!(FAILURES_TOTAL, "Failed requests by failure kind");
            describe_counter!(RETRIES_TOTAL, "Same-profile retries and fallback switches");
            describe_counter!(FALLBACKS_TOTAL, "Switches to a fallback profile");
            describe_counter!(RATE_LIMITED_TOTAL, "Dispatches delayed by the rate limiter");
            describe_histogram!(REQUEST_DURATION_SECONDS, Unit::Seconds, "Request duration");
            describe_gauge!(REQUEST_LATENCY_MS, Unit::Milliseconds, "Latency percentiles over the recent window");
            describe_gauge!(CIRCUIT_BREAKER_STATE, "Circuit breaker state (0 closed, 1 half-open, 2 open)");

            for name in [
                REQUESTS_TOTAL,
                REQUESTS_SUCCESS_TOTAL,
                REQUESTS_FAILED_TOTAL,
                RETRIES_TOTAL,
                FALLBACKS_TOTAL,
                RATE_LIMITED_TOTAL,
            ] {
                counter!(name).absolute(0);
            }
            for kind in FailureKind::ALL {
                counter!(FAILURES_TOTAL, "kind" => kind.as_str()).absolute(0);
            }
            gauge!(CIRCUIT_BREAKER_STATE).set(0.0);
        });
        exporter
    }

    fn with<T>(&self, f: impl FnOnce() -> T) -> T {
        ::metrics::with_local_recorder(&self.recorder, f)
    }

    /// `failure` is `None` for a successful request.
    pub fn record_request(&self, latency_ms: u64, failure: Option<FailureKind>) {
        self.with(|| {
            counter!(REQUESTS_TOTAL).increment(1);
            match failure {
                None => counter!(REQUESTS_SUCCESS_TOTAL).increment(1),
                Some(kind) => {
                    counter!(REQUESTS_FAILED_TOTAL).increment(1);
                    counter!(FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
                }
            }
            histogram!(REQUEST_DURATION_SECONDS).record(latency_ms as f64 / 1000.0);
        });
    }

    pub fn record_retry(&self) {
        self.with(|| counter!(RETRIES_TOTAL).increment(1));
    }

    pub fn record_fallback(&self) {
        self.with(|| counter!(FALLBACKS_TOTAL).increment(1));
    }

    pub fn record_rate_limited(&self) {
        self.with(|| counter!(RATE_LIMITED_TOTAL).increment(1));
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        self.with(|| gauge!(CIRCUIT_BREAKER_STATE).set(f64::from(state.gauge_value())));
    }

    /// Text exposition. Percentile gauges are refreshed from `snapshot` first.
    pub fn render(&self, snapshot: &MetricsSnapshot) -> String {
        self.with(|| {
            for (quantile, value) in [
                ("0.5", snapshot.latency.p50_ms),
                ("0.95", snapshot.latency.p95_ms),
                ("0.99", snapshot.latency.p99_ms),
            ] {
                gauge!(REQUEST_LATENCY_MS, "quantile" => quantile).set(value as f64);
            }
        });
        self.handle.render()
    }
}
