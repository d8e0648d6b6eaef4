//! Canned replies returned when no real reply could be produced.

use std::sync::LazyLock;

use regex::Regex;
use warden_core::FailureKind;

static NEW_SESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(new|session|reset|restart)\b").expect("valid pattern"));

/// Reply for a failed call. Never includes internal detail.
pub fn degraded_reply(kind: FailureKind, message: &str) -> String {
    if NEW_SESSION.is_match(message) && matches!(kind, FailureKind::Timeout | FailureKind::BinaryNotFound) {
        return "[degraded] A fresh session has started and the assistant is still warming up. \
                Send your question again in a moment."
            .to_string();
    }
    let body = match kind {
        FailureKind::Timeout => {
            "The assistant took too long to answer. Please try again in a moment."
        }
        FailureKind::RateLimited | FailureKind::InsufficientCredit => {
            "The assistant has reached its usage limit for now. Please try again later."
        }
        FailureKind::BinaryNotFound => {
            "The assistant is unavailable because of a configuration problem. An operator has been alerted."
        }
        FailureKind::CircuitOpen => {
            "The assistant is paused after repeated failures. Please try again in a few minutes."
        }
        FailureKind::UnknownProcessError => {
            "Something went wrong while generating a reply. Please try again."
        }
    };
    format!("[degraded] {body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_labeled() {
        for kind in FailureKind::ALL {
            let reply = degraded_reply(kind, "what is the price of gold?");
            assert!(reply.starts_with("[degraded] "), "{kind}: {reply}");
            assert!(!reply.contains(kind.as_str()));
        }
    }

    #[test]
    fn new_session_variant() {
        let reply = degraded_reply(FailureKind::Timeout, "start a NEW session please");
        assert!(reply.contains("fresh session"));
        let reply = degraded_reply(FailureKind::CircuitOpen, "new session");
        assert!(!reply.contains("fresh session"));
        let reply = degraded_reply(FailureKind::Timeout, "renewal dates");
        assert!(!reply.contains("fresh session"));
    }
}
