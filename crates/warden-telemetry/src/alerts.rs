use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use warden_core::{CircuitState, FailureKind};

use crate::metrics::MetricsSnapshot;

/// Fired alerts kept for inspection.
pub const RECENT_ALERTS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

type Predicate = Box<dyn Fn(&MetricsSnapshot) -> bool + Send + Sync>;

pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    pub message: String,
    pub cooldown: Duration,
    predicate: Predicate,
    last_fired: Option<Instant>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        cooldown: Duration,
        predicate: impl Fn(&MetricsSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            severity,
            message: message.into(),
            cooldown,
            predicate: Box::new(predicate),
            last_fired: None,
        }
    }

    fn cooling_down(&self, now: Instant) -> bool {
        self.last_fired
            .is_some_and(|at| now.saturating_duration_since(at) < self.cooldown)
    }
}

impl std::fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertRule")
            .field("id", &self.id)
            .field("severity", &self.severity)
            .field("cooldown", &self.cooldown)
            .field("last_fired", &self.last_fired)
            .finish()
    }
}

/// A fired alert.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub rule_id: String,
    pub name: String,
    pub severity: Severity,
    pub message: String,
    pub fired_at: DateTime<Utc>,
    pub error_rate: f64,
    pub p95_ms: u64,
    pub circuit_state: CircuitState,
}

/// Evaluates rules against snapshots and enforces per-rule cooldowns.
#[derive(Debug)]
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    recent: VecDeque<Alert>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            recent: VecDeque::with_capacity(RECENT_ALERTS),
        }
    }

    /// Built-in rule set. `p95_threshold_ms` drives the latency rule.
    pub fn with_default_rules(p95_threshold_ms: u64) -> Self {
        Self::new(default_rules(p95_threshold_ms))
    }

    pub fn add_rule(&mut self, rule: AlertRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate every rule. Returns alerts fired by this evaluation.
    pub fn evaluate(&mut self, snapshot: &MetricsSnapshot, now: Instant) -> Vec<Alert> {
        let mut fired = Vec::new();
        for rule in &mut self.rules {
            if rule.cooling_down(now) || !(rule.predicate)(snapshot) {
                continue;
            }
            rule.last_fired = Some(now);
            fired.push(Alert {
                rule_id: rule.id.clone(),
                name: rule.name.clone(),
                severity: rule.severity,
                message: rule.message.clone(),
                fired_at: Utc::now(),
                error_rate: snapshot.error_rate(),
                p95_ms: snapshot.latency.p95_ms,
                circuit_state: snapshot.circuit_state,
            });
        }
        for alert in &fired {
            if self.recent.len() == RECENT_ALERTS {
                self.recent.pop_front();
            }
            self.recent.push_back(alert.clone());
        }
        fired
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.recent.iter().rev().take(limit).cloned().collect()
    }

    /// Forget fired alerts and cooldowns.
    pub fn reset(&mut self) {
        self.recent.clear();
        for rule in &mut self.rules {
            rule.last_fired = None;
        }
    }
}

fn default_rules(p95_threshold_ms: u64) -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "high_error_rate",
            "High error rate",
            Severity::High,
            "more than 20% of requests are failing",
            Duration::from_secs(5 * 60),
            |s| s.total > 10 && s.error_rate() > 0.2,
        ),
        AlertRule::new(
            "circuit_breaker_open",
            "Circuit breaker open",
            Severity::Critical,
            "the circuit breaker is open; requests are being rejected",
            Duration::from_secs(60),
            |s| s.circuit_state == CircuitState::Open,
        ),
        AlertRule::new(
            "high_latency",
            "High latency",
            Severity::Medium,
            format!("p95 latency is above {p95_threshold_ms}ms"),
            Duration::from_secs(3 * 60),
            move |s| s.latency.samples > 0 && s.latency.p95_ms > p95_threshold_ms,
        ),
        AlertRule::new(
            "rate_limit_pressure",
            "Rate limit pressure",
            Severity::Low,
            "more than 10% of requests waited at the rate limiter",
            Duration::from_secs(10 * 60),
            |s| s.total > 0 && s.rate_limited_rate() > 0.1,
        ),
        AlertRule::new(
            "binary_not_found",
            "Agent binary missing",
            Severity::Critical,
            "the agent binary could not be started; check the deployment",
            Duration::from_secs(60),
            |s| s.last_failure == Some(FailureKind::BinaryNotFound),
        ),
        AlertRule::new(
            "credit_exhausted",
            "Provider credit exhausted",
            Severity::High,
            "every profile reported insufficient credit",
            Duration::from_secs(10 * 60),
            |s| s.last_failure == Some(FailureKind::InsufficientCredit),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsAggregator;

    fn ids(alerts: &[Alert]) -> Vec<&str> {
        alerts.iter().map(|a| a.rule_id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_open_fires_once_per_cooldown() {
        let agg = MetricsAggregator::default();
        agg.set_circuit_state(CircuitState::Open);
        let mut engine = AlertEngine::with_default_rules(30_000);

        let fired = engine.evaluate(&agg.snapshot(), Instant::now());
        assert_eq!(ids(&fired), vec!["circuit_breaker_open"]);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(engine.evaluate(&agg.snapshot(), Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let fired = engine.evaluate(&agg.snapshot(), Instant::now());
        assert_eq!(ids(&fired), vec!["circuit_breaker_open"]);
        assert_eq!(engine.recent(10).len(), 2);
    }

    #[tokio::test]
    async fn error_rate_needs_minimum_volume() {
        let agg = MetricsAggregator::default();
        for _ in 0..5 {
            agg.record_outcome(100, false, Some(FailureKind::Timeout));
        }
        let mut engine = AlertEngine::with_default_rules(30_000);
        assert!(engine.evaluate(&agg.snapshot(), Instant::now()).is_empty());

        for _ in 0..6 {
            agg.record_outcome(100, false, Some(FailureKind::Timeout));
        }
        let fired = engine.evaluate(&agg.snapshot(), Instant::now());
        assert_eq!(ids(&fired), vec!["high_error_rate"]);
    }

    #[tokio::test]
    async fn missing_binary_is_critical() {
        let agg = MetricsAggregator::default();
        agg.record_outcome(3, false, Some(FailureKind::BinaryNotFound));
        let mut engine = AlertEngine::with_default_rules(30_000);
        let fired = engine.evaluate(&agg.snapshot(), Instant::now());
        assert_eq!(ids(&fired), vec!["binary_not_found"]);
        assert_eq!(fired[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn latency_rule_uses_threshold() {
        let agg = MetricsAggregator::default();
        agg.record_outcome(2_000, true, None);
        let mut engine = AlertEngine::with_default_rules(1_000);
        let fired = engine.evaluate(&agg.snapshot(), Instant::now());
        assert_eq!(ids(&fired), vec!["high_latency"]);
    }

    #[tokio::test]
    async fn custom_rule_and_reset() {
        let agg = MetricsAggregator::default();
        let mut engine = AlertEngine::new(Vec::new());
        engine.add_rule(AlertRule::new(
            "any_retry",
            "Any retry",
            Severity::Low,
            "a retry happened",
            Duration::from_secs(3600),
            |s| s.retries > 0,
        ));
        agg.record_retry();
        assert_eq!(engine.evaluate(&agg.snapshot(), Instant::now()).len(), 1);
        assert!(engine.evaluate(&agg.snapshot(), Instant::now()).is_empty());

        engine.reset();
        assert!(engine.recent(10).is_empty());
        assert_eq!(engine.evaluate(&agg.snapshot(), Instant::now()).len(), 1);
    }
}
