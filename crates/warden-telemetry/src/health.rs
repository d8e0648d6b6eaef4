//! Health scoring.
//!
//! Starts at 100 and subtracts a penalty per detected problem. The score is
//! clamped to `[0, 100]`; `>= 80` is healthy, `>= 50` degraded.

use serde::{Deserialize, Serialize};
use warden_core::{CircuitState, FailureKind};

use crate::metrics::MetricsSnapshot;

#[derive(Clone, Debug)]
pub struct HealthThresholds {
    /// Error rate above this costs 30 points.
    pub error_rate_critical: f64,
    /// Error rate above this costs 15 points.
    pub error_rate_warning: f64,
    pub p95_latency_ms: u64,
    pub rate_limited_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_rate_critical: 0.2,
            error_rate_warning: 0.1,
            p95_latency_ms: 30_000,
            rate_limited_rate: 0.1,
        }
    }
}

const PENALTY_ERROR_CRITICAL: u32 = 30;
const PENALTY_ERROR_WARNING: u32 = 15;
const PENALTY_CIRCUIT_OPEN: u32 = 50;
const PENALTY_SLOW: u32 = 20;
const PENALTY_RATE_LIMITED: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            Self::Healthy
        } else if score >= 50 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub score: u32,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub circuit_state: CircuitState,
    pub error_rate: f64,
    pub p95_ms: u64,
    pub total_requests: u64,
}

/// Score a metrics snapshot.
pub fn health_report(snapshot: &MetricsSnapshot, thresholds: &HealthThresholds) -> HealthReport {
    let mut penalty = 0u32;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    let error_rate = snapshot.error_rate();
    if error_rate > thresholds.error_rate_critical {
        penalty += PENALTY_ERROR_CRITICAL;
        issues.push(format!("high error rate: {:.1}%", error_rate * 100.0));
        recommendations.push("check process logs and provider status".to_string());
    } else if error_rate > thresholds.error_rate_warning {
        penalty += PENALTY_ERROR_WARNING;
        issues.push(format!("elevated error rate: {:.1}%", error_rate * 100.0));
        recommendations.push("watch failure kinds for a trend".to_string());
    }

    if snapshot.circuit_state == CircuitState::Open {
        penalty += PENALTY_CIRCUIT_OPEN;
        issues.push("circuit breaker is open".to_string());
        recommendations.push("the process is failing repeatedly; verify it starts and responds".to_string());
    }

    let p95 = snapshot.latency.p95_ms;
    if p95 > thresholds.p95_latency_ms {
        penalty += PENALTY_SLOW;
        issues.push(format!("high p95 latency: {p95}ms"));
        recommendations.push("shorten prompts or raise the process timeout".to_string());
    }

    let rate_limited = snapshot.rate_limited_rate();
    if rate_limited > thresholds.rate_limited_rate {
        penalty += PENALTY_RATE_LIMITED;
        issues.push(format!("{:.1}% of requests waited at the rate limiter", rate_limited * 100.0));
        recommendations.push("callers are sending faster than the dispatch interval".to_string());
    }

    if snapshot.failures_of(FailureKind::BinaryNotFound) > 0 {
        recommendations.push("agent binary was not found; check process.binary".to_string());
    }
    if snapshot.failures_of(FailureKind::InsufficientCredit) > 0 {
        recommendations.push("a profile ran out of credit; top up or add a fallback profile".to_string());
    }

    let score = 100u32.saturating_sub(penalty);
    HealthReport {
        status: HealthStatus::from_score(score),
        score,
        issues,
        recommendations,
        circuit_state: snapshot.circuit_state,
        error_rate,
        p95_ms: p95,
        total_requests: snapshot.total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsAggregator;

    fn with_failure_rate(failures: u64, total: u64) -> MetricsAggregator {
        let agg = MetricsAggregator::default();
        for i in 0..total {
            if i < failures {
                agg.record_outcome(1_000, false, Some(FailureKind::Timeout));
            } else {
                agg.record_outcome(1_000, true, None);
            }
        }
        agg
    }

    #[test]
    fn empty_snapshot_is_healthy() {
        let report = health_report(&MetricsAggregator::default().snapshot(), &HealthThresholds::default());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.score, 100);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn quarter_failures_degrade() {
        let agg = with_failure_rate(25, 100);
        let report = health_report(&agg.snapshot(), &HealthThresholds::default());
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.score < 80);
        assert_eq!(report.score, 70);
    }

    #[test]
    fn open_circuit_costs_at_least_fifty() {
        let agg = with_failure_rate(25, 100);
        let before = health_report(&agg.snapshot(), &HealthThresholds::default()).score;
        agg.set_circuit_state(CircuitState::Open);
        let after = health_report(&agg.snapshot(), &HealthThresholds::default());
        assert!(before - after.score >= 50);
        assert_eq!(after.status, HealthStatus::Unhealthy);
        assert!(after.issues.iter().any(|i| i.contains("circuit")));
    }

    #[test]
    fn warning_band_error_rate() {
        let agg = with_failure_rate(15, 100);
        let report = health_report(&agg.snapshot(), &HealthThresholds::default());
        assert_eq!(report.score, 85);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn slow_p95_penalized() {
        let agg = MetricsAggregator::default();
        for _ in 0..10 {
            agg.record_outcome(45_000, true, None);
        }
        let report = health_report(&agg.snapshot(), &HealthThresholds::default());
        assert_eq!(report.score, 80);
        assert_eq!(report.p95_ms, 45_000);
    }

    #[test]
    fn score_clamps_at_zero() {
        let agg = MetricsAggregator::default();
        for _ in 0..10 {
            agg.record_outcome(60_000, false, Some(FailureKind::Timeout));
            agg.record_rate_limit_wait(std::time::Duration::from_millis(50));
        }
        agg.set_circuit_state(CircuitState::Open);
        let report = health_report(&agg.snapshot(), &HealthThresholds::default());
        // 30 + 50 + 20 + 10 = 110
        assert_eq!(report.score, 0);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn status_bands() {
        assert_eq!(HealthStatus::from_score(80), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(79), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(50), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(49), HealthStatus::Unhealthy);
    }
}
