use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FailureKind;
use crate::ids::RequestId;

/// Terminal or pending state of a dispatched request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Success,
    Failure(FailureKind),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("request {0} already settled")]
pub struct AlreadySettled(pub RequestId);

/// One logical call through the dispatcher, including its retries and fallbacks.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_id: RequestId,
    pub started_at: DateTime<Utc>,
    pub caller_id: String,
    pub payload: String,
    outcome: Outcome,
    latency_ms: Option<u64>,
    /// Profile that produced the terminal outcome.
    profile: Option<String>,
}

impl Request {
    pub fn new(caller_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            started_at: Utc::now(),
            caller_id: caller_id.into(),
            payload: payload.into(),
            outcome: Outcome::Pending,
            latency_ms: None,
            profile: None,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn is_settled(&self) -> bool {
        self.outcome != Outcome::Pending
    }

    /// Set the terminal outcome. Refused if already settled.
    pub fn settle(
        &mut self,
        outcome: Outcome,
        latency_ms: u64,
        profile: Option<String>,
    ) -> Result<(), AlreadySettled> {
        if self.is_settled() {
            return Err(AlreadySettled(self.request_id.clone()));
        }
        self.outcome = outcome;
        self.latency_ms = Some(latency_ms);
        self.profile = profile;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_is_pending() {
        let req = Request::new("u1", "hello");
        assert_eq!(req.outcome(), Outcome::Pending);
        assert!(req.latency_ms().is_none());
        assert!(req.request_id.as_str().starts_with("req_"));
    }

    #[test]
    fn settles_exactly_once() {
        let mut req = Request::new("u1", "hello");
        req.settle(Outcome::Success, 120, Some("primary".into())).unwrap();
        assert_eq!(req.outcome(), Outcome::Success);
        assert_eq!(req.latency_ms(), Some(120));

        let err = req
            .settle(Outcome::Failure(FailureKind::Timeout), 5, None)
            .unwrap_err();
        assert_eq!(err.0, req.request_id);
        assert_eq!(req.outcome(), Outcome::Success);
        assert_eq!(req.profile(), Some("primary"));
    }

    #[test]
    fn outcome_serializes_with_kind() {
        let json = serde_json::to_value(Outcome::Failure(FailureKind::RateLimited)).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "rate_limited");
    }
}
