use warden_core::{DispatchError, ExecutionProfile};

/// Ordered execution profiles: primary first, then fallbacks.
#[derive(Clone, Debug)]
pub struct FallbackPolicy {
    profiles: Vec<ExecutionProfile>,
}

impl FallbackPolicy {
    /// `None` when `profiles` is empty.
    pub fn new(profiles: Vec<ExecutionProfile>) -> Option<Self> {
        (!profiles.is_empty()).then_some(Self { profiles })
    }

    pub fn single(profile: ExecutionProfile) -> Self {
        Self {
            profiles: vec![profile],
        }
    }

    pub fn primary(&self) -> &ExecutionProfile {
        &self.profiles[0]
    }

    pub fn profiles(&self) -> &[ExecutionProfile] {
        &self.profiles
    }

    /// Walk the chain from `start` (by name), or from the primary.
    pub fn chain(&self, start: Option<&str>) -> FallbackChain<'_> {
        let index = start
            .and_then(|name| self.profiles.iter().position(|p| p.name == name))
            .unwrap_or(0);
        FallbackChain {
            profiles: &self.profiles,
            index,
        }
    }
}

/// Cursor over a fallback chain. Only moves forward, so each profile is tried
/// at most once per call.
#[derive(Debug)]
pub struct FallbackChain<'a> {
    profiles: &'a [ExecutionProfile],
    index: usize,
}

impl<'a> FallbackChain<'a> {
    pub fn current(&self) -> &'a ExecutionProfile {
        &self.profiles[self.index]
    }

    /// Move to the next profile if `err` is a policy limit and one remains.
    pub fn advance(&mut self, err: &DispatchError) -> Option<&'a ExecutionProfile> {
        if !err.triggers_fallback() || self.index + 1 >= self.profiles.len() {
            return None;
        }
        self.index += 1;
        Some(&self.profiles[self.index])
    }
}

/// Same-profile retries for transient process failures. No backoff: the rate
/// limiter already spaces attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_timeout_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_timeout_retries: 1,
        }
    }
}

impl RetryPolicy {
    /// `retries_so_far` counts retries already made on the current profile.
    pub fn should_retry(&self, err: &DispatchError, retries_so_far: u32) -> bool {
        err.is_retryable() && retries_so_far < self.max_timeout_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_core::FailureKind;

    fn policy() -> FallbackPolicy {
        FallbackPolicy::new(vec![
            ExecutionProfile::named("primary"),
            ExecutionProfile::named("secondary").with_model("small"),
            ExecutionProfile::named("tertiary"),
        ])
        .unwrap()
    }

    #[test]
    fn empty_policy_rejected() {
        assert!(FallbackPolicy::new(vec![]).is_none());
    }

    #[test]
    fn chain_advances_on_policy_limits_only() {
        let policy = policy();
        let mut chain = policy.chain(None);
        assert_eq!(chain.current().name, "primary");

        let timeout = DispatchError::timeout(Duration::from_secs(1));
        assert!(chain.advance(&timeout).is_none());
        assert_eq!(chain.current().name, "primary");

        let limited = DispatchError::new(FailureKind::RateLimited, "429");
        assert_eq!(chain.advance(&limited).unwrap().name, "secondary");
        let credit = DispatchError::new(FailureKind::InsufficientCredit, "recharge");
        assert_eq!(chain.advance(&credit).unwrap().name, "tertiary");
        assert!(chain.advance(&limited).is_none());
        assert_eq!(chain.current().name, "tertiary");
    }

    #[test]
    fn chain_can_start_mid_way() {
        let policy = policy();
        assert_eq!(policy.chain(Some("secondary")).current().name, "secondary");
        assert_eq!(policy.chain(Some("missing")).current().name, "primary");
    }

    #[test]
    fn retry_budget() {
        let retry = RetryPolicy::default();
        let timeout = DispatchError::timeout(Duration::from_secs(1));
        assert!(retry.should_retry(&timeout, 0));
        assert!(!retry.should_retry(&timeout, 1));

        let crashed = DispatchError::new(FailureKind::UnknownProcessError, "eof").with_restart();
        assert!(retry.should_retry(&crashed, 0));

        let plain = DispatchError::new(FailureKind::UnknownProcessError, "exit 1");
        assert!(!retry.should_retry(&plain, 0));
        let limited = DispatchError::new(FailureKind::RateLimited, "429");
        assert!(!retry.should_retry(&limited, 0));
    }
}
