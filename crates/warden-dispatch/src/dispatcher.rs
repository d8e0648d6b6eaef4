//! Single-flight dispatch to the agent process.
//!
//! Every call waits for the dispatch slot, then runs on its own task so that a
//! caller giving up (client disconnect, HTTP timeout) never abandons the
//! process mid-exchange. Inside the slot each attempt goes through the circuit
//! breaker and then the rate limiter before reaching the process; timeouts are
//! retried on the same profile and policy limits fall through to the next
//! profile in the chain.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use warden_core::{
    CircuitState, DispatchError, ExecutionProfile, FailureKind, Outcome, Request, RequestId,
};
use warden_telemetry::Monitor;

use crate::breaker::{Admission, BreakerConfig, CircuitBreaker, Transition};
use crate::policy::{FallbackPolicy, RetryPolicy};
use crate::process::AgentProcess;
use crate::rate_limit::RateLimiter;

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Per-attempt deadline when the call does not carry its own.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub rate_limit_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(300_000),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            rate_limit_interval: Duration::from_millis(100),
        }
    }
}

/// One call into the dispatcher.
#[derive(Clone, Debug)]
pub struct Call {
    pub caller_id: String,
    pub payload: String,
    pub timeout: Option<Duration>,
    /// Start the fallback chain at this profile instead of the primary.
    pub profile: Option<String>,
    /// Sent instead of `payload` once an attempt lands on a process that has
    /// not seen the earlier exchanges: after any process reset during this
    /// call, or on a profile other than the first.
    pub recovery_payload: Option<String>,
}

impl Call {
    pub fn new(caller_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            payload: payload.into(),
            timeout: None,
            profile: None,
            recovery_payload: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_recovery_payload(mut self, payload: impl Into<String>) -> Self {
        self.recovery_payload = Some(payload.into());
        self
    }
}

/// Successful call result.
#[derive(Clone, Debug)]
pub struct Dispatched {
    pub text: String,
    pub request_id: RequestId,
    /// Profile that produced the reply.
    pub profile: String,
    pub latency_ms: u64,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ProcessDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    process: Arc<dyn AgentProcess>,
    fallback: FallbackPolicy,
    retry: RetryPolicy,
    timeout: Duration,
    slot: Arc<tokio::sync::Mutex<()>>,
    limiter: RateLimiter,
    breaker: Mutex<CircuitBreaker>,
    monitor: Arc<Monitor>,
    queued: AtomicUsize,
    /// Bumped whenever a process instance is discarded.
    epoch: AtomicU64,
}

/// Counts a caller as queued until dropped.
struct Queued<'a>(&'a AtomicUsize);

impl<'a> Queued<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProcessDispatcher {
    pub fn new(
        process: Arc<dyn AgentProcess>,
        fallback: FallbackPolicy,
        config: DispatcherConfig,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                process,
                fallback,
                retry: config.retry,
                timeout: config.timeout,
                slot: Arc::new(tokio::sync::Mutex::new(())),
                limiter: RateLimiter::new(config.rate_limit_interval),
                breaker: Mutex::new(CircuitBreaker::new(config.breaker)),
                monitor,
                queued: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Run one call to completion: single-flight, rate limited, breaker
    /// guarded, with same-profile retries and profile fallback.
    pub async fn execute(&self, call: Call) -> Result<Dispatched, DispatchError> {
        let timeout = call.timeout.unwrap_or(self.inner.timeout);
        if timeout.is_zero() {
            return Err(DispatchError::new(
                FailureKind::UnknownProcessError,
                "timeout must be greater than zero",
            ));
        }

        let request = Request::new(call.caller_id, call.payload);
        let span = info_span!(
            "dispatch",
            request_id = %request.request_id,
            caller_id = %request.caller_id,
        );

        let permit = {
            let _queued = Queued::enter(&self.inner.queued);
            self.inner.slot.clone().lock_owned().await
        };

        let inner = self.inner.clone();
        let start = call.profile;
        let recovery = call.recovery_payload;
        let task = tokio::spawn(
            async move {
                let _permit = permit;
                inner.run(request, recovery, start, timeout).await
            }
            .instrument(span),
        );
        task.await.unwrap_or_else(|e| {
            Err(DispatchError::new(
                FailureKind::UnknownProcessError,
                format!("dispatch task failed: {e}"),
            ))
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.lock().state()
    }

    /// Time until an open circuit admits its probe.
    pub fn circuit_retry_after(&self) -> Option<Duration> {
        self.inner.breaker.lock().retry_after(Instant::now())
    }

    /// Force the breaker closed. Returns whether it was not already closed.
    pub fn reset_circuit(&self) -> bool {
        let transition = self.inner.breaker.lock().reset();
        match transition {
            Some(t) => {
                info!(from = %t.from, "circuit breaker reset manually");
                self.inner.report(Some(t));
                true
            }
            None => false,
        }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.inner.monitor
    }

    pub fn profiles(&self) -> &[ExecutionProfile] {
        self.inner.fallback.profiles()
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn transport(&self) -> &str {
        self.inner.process.name()
    }

    /// Callers waiting for the dispatch slot.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.inner.slot.try_lock().is_err()
    }

    /// Changes whenever a process instance is discarded, so a caller can tell
    /// whether the process still holds what it was sent before.
    pub fn process_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Whether the transport keeps one process alive across calls.
    pub fn retains_context(&self) -> bool {
        self.inner.process.retains_context()
    }

    /// Discard the process instance serving `profile` (or every profile).
    pub async fn restart_process(&self, profile: Option<&str>) {
        let _permit = self.inner.slot.clone().lock_owned().await;
        for p in self.inner.fallback.profiles() {
            if profile.map_or(true, |name| name == p.name) {
                self.inner.reset_process(p).await;
            }
        }
    }

    /// Wait for the in-flight exchange, then stop the process.
    pub async fn shutdown(&self) {
        let _permit = self.inner.slot.clone().lock_owned().await;
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.process.shutdown().await;
        info!(transport = self.inner.process.name(), "agent process stopped");
    }
}

impl Inner {
    async fn run(
        &self,
        mut request: Request,
        recovery: Option<String>,
        start: Option<String>,
        timeout: Duration,
    ) -> Result<Dispatched, DispatchError> {
        let started = Instant::now();
        let mut chain = self.fallback.chain(start.as_deref());
        let first_profile = chain.current().name.clone();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut retries_on_profile = 0u32;
        let mut attempts = 0u32;
        let mut last_error: Option<DispatchError> = None;

        let result = loop {
            // A rejected attempt never waits at the limiter.
            let admission = match self.admit() {
                Ok(a) => a,
                // A retry blocked by a circuit that just opened reports the real failure.
                Err(e) => break Err(last_error.take().unwrap_or(e)),
            };

            let waited = self.limiter.acquire().await;
            self.monitor.record_rate_limit_wait(waited);

            let profile = chain.current();
            let payload = match &recovery {
                Some(full) if profile.name != first_profile || self.epoch.load(Ordering::SeqCst) != epoch => {
                    full.as_str()
                }
                _ => request.payload.as_str(),
            };
            attempts += 1;
            debug!(
                profile = %profile.name,
                attempt = attempts,
                probe = admission == Admission::Probe,
                "dispatching to agent process"
            );

            let outcome =
                match tokio::time::timeout(timeout, self.process.exchange(profile, payload)).await {
                    Ok(r) => r,
                    Err(_) => Err(DispatchError::timeout(timeout)),
                };

            let err = match outcome {
                Ok(text) => {
                    let t = self.breaker.lock().record_success();
                    self.report(t);
                    break Ok((text, profile.name.clone()));
                }
                Err(err) => err,
            };

            warn!(profile = %profile.name, kind = %err.kind, error = %err.detail, "agent exchange failed");
            if err.counts_toward_circuit() {
                let t = self.breaker.lock().record_failure(Instant::now());
                self.report(t);
            } else {
                self.breaker.lock().record_neutral();
            }
            if err.restart_required {
                self.reset_process(profile).await;
            }

            if let Some(next) = chain.advance(&err) {
                warn!(from = %profile.name, to = %next.name, kind = %err.kind, "falling back to next profile");
                self.monitor.record_fallback();
                retries_on_profile = 0;
                last_error = Some(err);
                continue;
            }
            if self.retry.should_retry(&err, retries_on_profile) {
                retries_on_profile += 1;
                info!(profile = %profile.name, retry = retries_on_profile, "retrying on same profile");
                self.monitor.record_retry();
                last_error = Some(err);
                continue;
            }
            break Err(err);
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let settled = match &result {
            Ok((_, profile)) => request.settle(Outcome::Success, latency_ms, Some(profile.clone())),
            Err(e) => request.settle(Outcome::Failure(e.kind), latency_ms, None),
        };
        if let Err(e) = settled {
            warn!(error = %e, "request outcome already recorded");
        }
        self.monitor.record_request(&request);

        match result {
            Ok((text, profile)) => {
                info!(profile = %profile, latency_ms, attempts, "dispatch succeeded");
                Ok(Dispatched {
                    text,
                    request_id: request.request_id,
                    profile,
                    latency_ms,
                    attempts,
                })
            }
            Err(e) => {
                warn!(kind = %e.kind, latency_ms, attempts, "dispatch failed");
                Err(e)
            }
        }
    }

    async fn reset_process(&self, profile: &ExecutionProfile) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.process.reset(profile).await;
    }

    fn admit(&self) -> Result<Admission, DispatchError> {
        let (result, transition) = match self.breaker.lock().try_acquire(Instant::now()) {
            Ok((admission, t)) => (Ok(admission), t),
            Err(e) => (Err(e), None),
        };
        self.report(transition);
        result
    }

    fn report(&self, transition: Option<Transition>) {
        if let Some(t) = transition {
            self.monitor.record_circuit_transition(t.from, t.to);
        }
    }
}
