use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use warden_core::{CircuitState, FailureKind};

/// Upper bounds (seconds) of the request duration histogram buckets, `+Inf` implied.
pub const LATENCY_BUCKETS_SECS: [f64; 4] = [1.0, 5.0, 15.0, 30.0];

/// Default number of latency samples kept for percentiles.
pub const DEFAULT_LATENCY_WINDOW: usize = 1_000;

/// Monotonic counter within a reporting epoch.
#[derive(Default)]
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
    fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Nearest-rank percentile over an ascending slice: `index = ceil(n * p) - 1`.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (sorted.len() as f64 * p).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// Latency percentiles over the recent sample window.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyPercentiles {
    pub samples: usize,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Point-in-time view of all counters, percentiles and the circuit state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub retries: u64,
    pub fallbacks: u64,
    pub rate_limited: u64,
    pub rate_limit_wait_ms: u64,
    pub failures_by_kind: BTreeMap<FailureKind, u64>,
    /// Kind of the most recent terminal outcome; `None` after a success.
    pub last_failure: Option<FailureKind>,
    pub latency: LatencyPercentiles,
    pub circuit_state: CircuitState,
    pub epoch_started_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn error_rate(&self) -> f64 {
        ratio(self.failed, self.total)
    }

    pub fn rate_limited_rate(&self) -> f64 {
        ratio(self.rate_limited, self.total)
    }

    pub fn avg_rate_limit_wait_ms(&self) -> f64 {
        ratio(self.rate_limit_wait_ms, self.rate_limited)
    }

    pub fn failures_of(&self, kind: FailureKind) -> u64 {
        self.failures_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Thread-safe aggregation of request outcomes.
///
/// Counters are lock-free; the latency window sits behind a mutex.
pub struct MetricsAggregator {
    total: Counter,
    successful: Counter,
    failed: Counter,
    retries: Counter,
    fallbacks: Counter,
    rate_limited: Counter,
    rate_limit_wait_ms: Counter,
    failures: [Counter; FailureKind::ALL.len()],
    /// `0` none, otherwise index into `FailureKind::ALL` plus one.
    last_failure: AtomicU8,
    circuit: AtomicU8,
    window: usize,
    latency: Mutex<LatencyState>,
}

struct LatencyState {
    samples: VecDeque<u64>,
    epoch_started_at: DateTime<Utc>,
}

impl LatencyState {
    fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            epoch_started_at: Utc::now(),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl MetricsAggregator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            total: Counter::default(),
            successful: Counter::default(),
            failed: Counter::default(),
            retries: Counter::default(),
            fallbacks: Counter::default(),
            rate_limited: Counter::default(),
            rate_limit_wait_ms: Counter::default(),
            failures: Default::default(),
            last_failure: AtomicU8::new(0),
            circuit: AtomicU8::new(CircuitState::Closed.gauge_value()),
            window,
            latency: Mutex::new(LatencyState::new(window)),
        }
    }

    /// Record one terminal outcome. `failure` is ignored when `success` is true.
    pub fn record_outcome(&self, latency_ms: u64, success: bool, failure: Option<FailureKind>) {
        self.total.increment(1);
        if success {
            self.successful.increment(1);
            self.last_failure.store(0, Ordering::Relaxed);
        } else {
            self.failed.increment(1);
            let kind = failure.unwrap_or(FailureKind::UnknownProcessError);
            let idx = kind_index(kind);
            self.failures[idx].increment(1);
            self.last_failure.store(idx as u8 + 1, Ordering::Relaxed);
        }

        let mut latency = self.latency.lock();
        if latency.samples.len() == self.window {
            latency.samples.pop_front();
        }
        latency.samples.push_back(latency_ms);
    }

    /// A same-profile retry or a fallback switch happened.
    pub fn record_retry(&self) {
        self.retries.increment(1);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.increment(1);
    }

    /// A dispatch had to wait at the rate limiter.
    pub fn record_rate_limit_wait(&self, waited: Duration) {
        if waited.is_zero() {
            return;
        }
        self.rate_limited.increment(1);
        self.rate_limit_wait_ms.increment(waited.as_millis() as u64);
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        self.circuit.store(state.gauge_value(), Ordering::Relaxed);
    }

    pub fn circuit_state(&self) -> CircuitState {
        CircuitState::from_gauge(self.circuit.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (latency, epoch_started_at) = {
            let state = self.latency.lock();
            let mut sorted: Vec<u64> = state.samples.iter().copied().collect();
            sorted.sort_unstable();
            let latency = LatencyPercentiles {
                samples: sorted.len(),
                p50_ms: percentile(&sorted, 0.50),
                p95_ms: percentile(&sorted, 0.95),
                p99_ms: percentile(&sorted, 0.99),
            };
            (latency, state.epoch_started_at)
        };

        let failures_by_kind = FailureKind::ALL
            .iter()
            .zip(self.failures.iter())
            .filter(|(_, c)| c.get() > 0)
            .map(|(kind, c)| (*kind, c.get()))
            .collect();

        let last_failure = match self.last_failure.load(Ordering::Relaxed) {
            0 => None,
            n => FailureKind::ALL.get(n as usize - 1).copied(),
        };

        MetricsSnapshot {
            total: self.total.get(),
            successful: self.successful.get(),
            failed: self.failed.get(),
            retries: self.retries.get(),
            fallbacks: self.fallbacks.get(),
            rate_limited: self.rate_limited.get(),
            rate_limit_wait_ms: self.rate_limit_wait_ms.get(),
            failures_by_kind,
            last_failure,
            latency,
            circuit_state: self.circuit_state(),
            epoch_started_at,
        }
    }

    /// Start a new reporting epoch. The circuit state is live and kept.
    pub fn reset(&self) {
        for counter in [
            &self.total,
            &self.successful,
            &self.failed,
            &self.retries,
            &self.fallbacks,
            &self.rate_limited,
            &self.rate_limit_wait_ms,
        ] {
            counter.reset();
        }
        for counter in &self.failures {
            counter.reset();
        }
        self.last_failure.store(0, Ordering::Relaxed);
        *self.latency.lock() = LatencyState::new(self.window);
    }
}

fn kind_index(kind: FailureKind) -> usize {
    FailureKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(FailureKind::ALL.len() - 1)
}
