use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use warden_core::{DispatchError, ExecutionProfile, FailureKind};

use crate::process::AgentProcess;

/// Pre-programmed replies for deterministic testing without a real binary.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(DispatchError),
    /// Never answers; only the dispatcher timeout ends it.
    Hang,
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn error(kind: FailureKind) -> Self {
        Self::Error(DispatchError::new(kind, format!("scripted {kind}")))
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// One recorded exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub profile: String,
    pub prompt: String,
}

/// Scripted stand-in for the agent process.
///
/// Replies are consumed in order. Once the script runs out the process echoes
/// the last line of the prompt (after `echo_delay`), or fails if built with
/// [`ScriptedProcess::new`].
pub struct ScriptedProcess {
    script: Mutex<VecDeque<MockReply>>,
    echo: bool,
    echo_delay: Duration,
    retains_context: bool,
    invocations: Mutex<Vec<Invocation>>,
    resets: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProcess {
    pub fn new(script: Vec<MockReply>) -> Self {
        Self::build(script, false, Duration::ZERO)
    }

    pub fn echo() -> Self {
        Self::build(Vec::new(), true, Duration::ZERO)
    }

    pub fn echo_with_delay(delay: Duration) -> Self {
        Self::build(Vec::new(), true, delay)
    }

    /// Scripted replies first, then echo.
    pub fn then_echo(script: Vec<MockReply>) -> Self {
        Self::build(script, true, Duration::ZERO)
    }

    fn build(script: Vec<MockReply>, echo: bool, echo_delay: Duration) -> Self {
        Self {
            script: Mutex::new(script.into()),
            echo,
            echo_delay,
            retains_context: true,
            invocations: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Behave like a transport that starts a fresh process per exchange.
    pub fn without_memory(mut self) -> Self {
        self.retains_context = false;
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.script.lock().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.invocations.lock().len()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.invocations.lock().last().map(|i| i.prompt.clone())
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }

    /// Highest number of overlapping exchanges observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, prompt: &str) -> MockReply {
        if let Some(reply) = self.script.lock().pop_front() {
            return reply;
        }
        if self.echo {
            let last = prompt.lines().last().unwrap_or_default().to_string();
            MockReply::delayed(self.echo_delay, MockReply::Text(format!("echo: {last}")))
        } else {
            MockReply::Error(DispatchError::new(
                FailureKind::UnknownProcessError,
                "script exhausted",
            ))
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentProcess for ScriptedProcess {
    async fn exchange(&self, profile: &ExecutionProfile, prompt: &str) -> Result<String, DispatchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        self.invocations.lock().push(Invocation {
            profile: profile.name.clone(),
            prompt: prompt.to_string(),
        });

        // Nested delays are unrolled iteratively.
        let mut current = self.next_reply(prompt);
        loop {
            match current {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Hang => std::future::pending::<()>().await,
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }

    async fn reset(&self, _profile: &ExecutionProfile) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    async fn shutdown(&self) {}

    fn name(&self) -> &str {
        "scripted"
    }

    fn retains_context(&self) -> bool {
        self.retains_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_in_order_then_exhausts() {
        let mock = ScriptedProcess::new(vec![
            MockReply::text("first"),
            MockReply::error(FailureKind::RateLimited),
        ]);
        let p = ExecutionProfile::named("primary");
        assert_eq!(mock.exchange(&p, "a").await.unwrap(), "first");
        assert_eq!(mock.exchange(&p, "b").await.unwrap_err().kind, FailureKind::RateLimited);
        assert_eq!(
            mock.exchange(&p, "c").await.unwrap_err().kind,
            FailureKind::UnknownProcessError
        );
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.invocations()[1].prompt, "b");
    }

    #[tokio::test]
    async fn echo_uses_last_prompt_line() {
        let mock = ScriptedProcess::echo();
        let reply = mock
            .exchange(&ExecutionProfile::named("p"), "context\nAlice: hi")
            .await
            .unwrap();
        assert_eq!(reply, "echo: Alice: hi");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply_waits() {
        let mock = ScriptedProcess::new(vec![MockReply::delayed(
            Duration::from_secs(5),
            MockReply::text("late"),
        )]);
        let start = tokio::time::Instant::now();
        assert_eq!(mock.exchange(&ExecutionProfile::named("p"), "x").await.unwrap(), "late");
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_exchange_releases_in_flight() {
        let mock = ScriptedProcess::new(vec![MockReply::Hang]);
        let p = ExecutionProfile::named("p");
        let res = tokio::time::timeout(Duration::from_secs(1), mock.exchange(&p, "x")).await;
        assert!(res.is_err());
        assert_eq!(mock.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(mock.max_in_flight(), 1);
    }
}
