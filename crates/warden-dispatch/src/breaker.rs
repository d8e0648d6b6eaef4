//! Circuit breaker guarding the external process.
//!
//! Consecutive process-health failures open the circuit; after a cooldown a
//! single probe is admitted. A failed probe reopens with a doubled cooldown,
//! capped at `max_cooldown`.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};
use warden_core::{CircuitState, DispatchError};

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            max_cooldown: Duration::from_secs(600),
        }
    }
}

/// How a call was let through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The single trial call after a cooldown.
    Probe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: State,
    consecutive_failures: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let cooldown = config.cooldown;
        Self {
            config,
            state: State::Closed,
            consecutive_failures: 0,
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Cooldown that applies to the current (or next) open period.
    pub fn current_cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Time left before an open circuit admits a probe.
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        match self.state {
            State::Open { since } => Some((since + self.cooldown).saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Ask to dispatch. Rejected while open, and while a probe is already in flight.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(Admission, Option<Transition>), DispatchError> {
        match self.state {
            State::Closed => Ok((Admission::Normal, None)),
            State::Open { since } => {
                if now.saturating_duration_since(since) >= self.cooldown {
                    self.state = State::HalfOpen { probe_in_flight: true };
                    info!(cooldown_ms = self.cooldown.as_millis() as u64, "circuit breaker half-open, admitting probe");
                    Ok((
                        Admission::Probe,
                        Some(Transition {
                            from: CircuitState::Open,
                            to: CircuitState::HalfOpen,
                        }),
                    ))
                } else {
                    Err(DispatchError::circuit_open())
                }
            }
            State::HalfOpen { probe_in_flight: true } => Err(DispatchError::circuit_open()),
            State::HalfOpen { probe_in_flight: false } => {
                self.state = State::HalfOpen { probe_in_flight: true };
                Ok((Admission::Probe, None))
            }
        }
    }

    pub fn record_success(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        let from = self.state();
        if from == CircuitState::Closed {
            return None;
        }
        self.state = State::Closed;
        self.cooldown = self.config.cooldown;
        info!("circuit breaker closed");
        Some(Transition {
            from,
            to: CircuitState::Closed,
        })
    }

    /// A failure that says the process is unhealthy.
    pub fn record_failure(&mut self, now: Instant) -> Option<Transition> {
        self.consecutive_failures += 1;
        match self.state {
            State::HalfOpen { .. } => {
                self.cooldown = (self.cooldown * 2).min(self.config.max_cooldown);
                self.state = State::Open { since: now };
                warn!(
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "probe failed, circuit breaker reopened"
                );
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            State::Closed if self.consecutive_failures >= self.config.failure_threshold => {
                self.state = State::Open { since: now };
                warn!(
                    failures = self.consecutive_failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "circuit breaker opened"
                );
                Some(Transition {
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                })
            }
            _ => None,
        }
    }

    /// An outcome that says nothing about process health (rate limits, credit).
    /// Leaves the failure count alone and frees the probe slot.
    pub fn record_neutral(&mut self) {
        if let State::HalfOpen { probe_in_flight: true } = self.state {
            self.state = State::HalfOpen { probe_in_flight: false };
        }
    }

    /// Force the circuit closed.
    pub fn reset(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        self.cooldown = self.config.cooldown;
        let from = self.state();
        self.state = State::Closed;
        (from != CircuitState::Closed).then_some(Transition {
            from,
            to: CircuitState::Closed,
        })
    }
}
