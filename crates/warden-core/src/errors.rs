use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classes the dispatcher distinguishes.
/// Each one maps to a different retry, fallback and circuit policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    InsufficientCredit,
    BinaryNotFound,
    CircuitOpen,
    UnknownProcessError,
}

impl FailureKind {
    pub const ALL: [FailureKind; 6] = [
        Self::Timeout,
        Self::RateLimited,
        Self::InsufficientCredit,
        Self::BinaryNotFound,
        Self::CircuitOpen,
        Self::UnknownProcessError,
    ];

    /// Short classification string for logging/metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::InsufficientCredit => "insufficient_credit",
            Self::BinaryNotFound => "binary_not_found",
            Self::CircuitOpen => "circuit_open",
            Self::UnknownProcessError => "unknown_process_error",
        }
    }

    /// Provider policy limits: handled by switching profile, not by the breaker.
    pub fn triggers_fallback(self) -> bool {
        matches!(self, Self::RateLimited | Self::InsufficientCredit)
    }

    /// Whether this outcome says something about the health of the process itself.
    pub fn counts_toward_circuit(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::UnknownProcessError | Self::BinaryNotFound
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error of one dispatch attempt or of a whole call.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct DispatchError {
    pub kind: FailureKind,
    pub detail: String,
    /// The process instance is unusable and must be restarted before the next attempt.
    pub restart_required: bool,
}

impl DispatchError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            restart_required: false,
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            kind: FailureKind::Timeout,
            detail: format!("no reply after {after:?}"),
            restart_required: true,
        }
    }

    pub fn circuit_open() -> Self {
        Self::new(FailureKind::CircuitOpen, "circuit breaker is open")
    }

    pub fn with_restart(mut self) -> Self {
        self.restart_required = true;
        self
    }

    /// Retried on the same profile (bounded by the retry policy).
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Timeout
            || (self.kind == FailureKind::UnknownProcessError && self.restart_required)
    }

    pub fn triggers_fallback(&self) -> bool {
        self.kind.triggers_fallback()
    }

    pub fn counts_toward_circuit(&self) -> bool {
        self.kind.counts_toward_circuit()
    }

    pub fn error_kind(&self) -> &'static str {
        self.kind.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn policy_limits_trigger_fallback_not_circuit() {
        for kind in [FailureKind::RateLimited, FailureKind::InsufficientCredit] {
            assert!(kind.triggers_fallback());
            assert!(!kind.counts_toward_circuit());
        }
    }

    #[test]
    fn process_health_failures_count_toward_circuit() {
        assert!(FailureKind::Timeout.counts_toward_circuit());
        assert!(FailureKind::UnknownProcessError.counts_toward_circuit());
        assert!(FailureKind::BinaryNotFound.counts_toward_circuit());
        assert!(!FailureKind::CircuitOpen.counts_toward_circuit());
    }

    #[test]
    fn timeout_is_retryable_and_needs_restart() {
        let err = DispatchError::timeout(Duration::from_secs(5));
        assert!(err.is_retryable());
        assert!(err.restart_required);
        assert_eq!(err.error_kind(), "timeout");
    }

    #[test]
    fn crash_retryable_only_when_restart_required() {
        let plain = DispatchError::new(FailureKind::UnknownProcessError, "exit 1");
        assert!(!plain.is_retryable());
        assert!(plain.clone().with_restart().is_retryable());
    }

    #[test]
    fn fatal_kinds_not_retryable() {
        assert!(!DispatchError::new(FailureKind::BinaryNotFound, "ENOENT").is_retryable());
        assert!(!DispatchError::circuit_open().is_retryable());
        assert!(!DispatchError::new(FailureKind::RateLimited, "429").is_retryable());
    }

    #[test]
    fn display_includes_kind() {
        let err = DispatchError::new(FailureKind::InsufficientCredit, "Please recharge");
        assert_eq!(err.to_string(), "insufficient_credit: Please recharge");
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&FailureKind::BinaryNotFound).unwrap();
        assert_eq!(json, "\"binary_not_found\"");
    }
}
