use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};
use warden_core::{CircuitState, Outcome, Request};

use crate::alerts::{Alert, AlertEngine, Severity};
use crate::export::PrometheusExporter;
use crate::health::{health_report, HealthReport, HealthThresholds};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};

/// Settled requests kept for inspection.
pub const RECENT_REQUESTS: usize = 100;

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub latency_window: usize,
    pub thresholds: HealthThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            latency_window: crate::metrics::DEFAULT_LATENCY_WINDOW,
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Single sink for everything the dispatcher observes.
///
/// Every recorded outcome and circuit transition re-evaluates the alert rules
/// against a fresh snapshot.
pub struct Monitor {
    metrics: MetricsAggregator,
    alerts: Mutex<AlertEngine>,
    thresholds: HealthThresholds,
    recent: Mutex<VecDeque<Request>>,
    exporter: Mutex<PrometheusExporter>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let engine = AlertEngine::with_default_rules(config.thresholds.p95_latency_ms);
        Self::with_alert_engine(config, engine)
    }

    pub fn with_alert_engine(config: MonitorConfig, engine: AlertEngine) -> Self {
        Self {
            metrics: MetricsAggregator::new(config.latency_window),
            alerts: Mutex::new(engine),
            thresholds: config.thresholds,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_REQUESTS)),
            exporter: Mutex::new(PrometheusExporter::new()),
        }
    }

    /// Record a settled request. Pending requests are ignored.
    pub fn record_request(&self, request: &Request) {
        let latency_ms = request.latency_ms().unwrap_or(0);
        let failure = match request.outcome() {
            Outcome::Pending => return,
            Outcome::Success => None,
            Outcome::Failure(kind) => Some(kind),
        };
        self.metrics.record_outcome(latency_ms, failure.is_none(), failure);
        self.exporter.lock().record_request(latency_ms, failure);
        {
            let mut recent = self.recent.lock();
            if recent.len() == RECENT_REQUESTS {
                recent.pop_front();
            }
            recent.push_back(request.clone());
        }
        self.evaluate_alerts();
    }

    pub fn record_retry(&self) {
        self.metrics.record_retry();
        self.exporter.lock().record_retry();
    }

    pub fn record_fallback(&self) {
        self.metrics.record_retry();
        self.metrics.record_fallback();
        let exporter = self.exporter.lock();
        exporter.record_retry();
        exporter.record_fallback();
    }

    pub fn record_rate_limit_wait(&self, waited: Duration) {
        if waited.is_zero() {
            return;
        }
        self.metrics.record_rate_limit_wait(waited);
        self.exporter.lock().record_rate_limited();
    }

    pub fn record_circuit_transition(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(from = %from, to = %to, "circuit breaker transition"),
            _ => info!(from = %from, to = %to, "circuit breaker transition"),
        }
        self.metrics.set_circuit_state(to);
        self.exporter.lock().set_circuit_state(to);
        self.evaluate_alerts();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn health_report(&self) -> HealthReport {
        health_report(&self.metrics.snapshot(), &self.thresholds)
    }

    /// Prometheus text exposition of everything since the last reset.
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.metrics.snapshot();
        self.exporter.lock().render(&snapshot)
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.lock().recent(limit)
    }

    /// Most recent first.
    pub fn recent_requests(&self, limit: usize) -> Vec<Request> {
        self.recent.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Start a new reporting epoch: counters, samples, request log and alert cooldowns.
    pub fn reset(&self) {
        self.metrics.reset();
        let exporter = PrometheusExporter::new();
        exporter.set_circuit_state(self.metrics.circuit_state());
        *self.exporter.lock() = exporter;
        self.alerts.lock().reset();
        self.recent.lock().clear();
        info!("metrics reset");
    }

    fn evaluate_alerts(&self) {
        let snapshot = self.metrics.snapshot();
        let fired = self.alerts.lock().evaluate(&snapshot, Instant::now());
        for alert in fired {
            if alert.severity == Severity::Critical {
                error!(rule = %alert.rule_id, severity = ?alert.severity, "{}", alert.message);
            } else {
                warn!(rule = %alert.rule_id, severity = ?alert.severity, "{}", alert.message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use warden_core::FailureKind;

    fn settled(outcome: Outcome, latency_ms: u64) -> Request {
        let mut req = Request::new("u1", "hi");
        req.settle(outcome, latency_ms, Some("primary".into())).unwrap();
        req
    }

    #[tokio::test]
    async fn records_settled_requests_only() {
        let monitor = Monitor::default();
        monitor.record_request(&Request::new("u1", "pending"));
        monitor.record_request(&settled(Outcome::Success, 120));
        monitor.record_request(&settled(Outcome::Failure(FailureKind::Timeout), 300));

        let snap = monitor.snapshot();
        assert_eq!(snap.total, 2);
        assert_eq!(snap.failed, 1);
        let recent = monitor.recent_requests(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].outcome(), Outcome::Failure(FailureKind::Timeout));
    }

    #[tokio::test]
    async fn fallback_counts_as_retry() {
        let monitor = Monitor::default();
        monitor.record_fallback();
        monitor.record_retry();
        let snap = monitor.snapshot();
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.fallbacks, 1);
    }

    #[tokio::test]
    async fn circuit_transition_fires_alert_and_affects_health() {
        let monitor = Monitor::default();
        monitor.record_circuit_transition(CircuitState::Closed, CircuitState::Open);

        let alerts = monitor.recent_alerts(5);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id, "circuit_breaker_open");

        let report = monitor.health_report();
        assert_eq!(report.score, 50);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(monitor.export_prometheus().contains("warden_circuit_breaker_state 2"));
    }

    #[tokio::test]
    async fn reset_clears_everything_but_circuit() {
        let monitor = Monitor::default();
        monitor.record_request(&settled(Outcome::Failure(FailureKind::BinaryNotFound), 2));
        assert_eq!(monitor.recent_alerts(5).len(), 1);
        monitor.reset();
        assert_eq!(monitor.snapshot().total, 0);
        assert!(monitor.recent_alerts(5).is_empty());
        assert!(monitor.recent_requests(5).is_empty());
    }

    #[tokio::test]
    async fn export_tracks_recorded_events_and_restarts_on_reset() {
        let monitor = Monitor::default();
        monitor.record_request(&settled(Outcome::Success, 900));
        monitor.record_request(&settled(Outcome::Failure(FailureKind::RateLimited), 1_500));
        monitor.record_fallback();
        monitor.record_rate_limit_wait(Duration::ZERO);
        monitor.record_rate_limit_wait(Duration::from_millis(250));
        monitor.record_circuit_transition(CircuitState::Closed, CircuitState::Open);

        let text = monitor.export_prometheus();
        for line in [
            "warden_requests_total 2",
            "warden_requests_failed_total 1",
            "warden_failures_total{kind=\"rate_limited\"} 1",
            "warden_retries_total 1",
            "warden_fallbacks_total 1",
            "warden_rate_limited_total 1",
            "warden_circuit_breaker_state 2",
        ] {
            assert!(text.lines().any(|l| l.starts_with(line)), "missing {line:?} in\n{text}");
        }

        monitor.reset();
        let text = monitor.export_prometheus();
        assert!(text.lines().any(|l| l == "warden_requests_total 0"), "{text}");
        assert!(text.contains("warden_circuit_breaker_state 2"), "{text}");
    }
}
