//! Entry point for callers: one shared conversation in front of the dispatcher.
//!
//! Turns are serialized on the session lock. Each turn runs on its own task
//! holding that lock, stages its changes on a copy of the session and commits
//! the copy only when the dispatcher returns a real reply. A caller that goes
//! away mid-turn does not stop the turn from being committed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use warden_core::{FailureKind, RequestId, SessionId, SessionSnapshot};
use warden_dispatch::{Call, ProcessDispatcher};
use warden_settings::{ContextMode, SessionSettings};
use warden_store::{SessionStateRepo, SnapshotWriter, SHARED_SESSION_KEY};
use warden_telemetry::Monitor;

use crate::degraded::degraded_reply;
use crate::error::EngineError;
use crate::session::{ConversationSession, SessionLimits, SessionStats};

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub limits: SessionLimits,
    pub context_mode: ContextMode,
    /// Speaker recorded for replies.
    pub assistant_name: String,
    pub max_message_chars: usize,
    /// Zero disables the maintenance task.
    pub checkpoint_interval: Duration,
    /// Per-attempt deadline. The dispatcher default applies when unset.
    pub timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            limits: SessionLimits {
                history_cap: settings.history_cap,
                caller_cap: settings.caller_cap,
                idle_timeout: settings.idle_timeout(),
            },
            context_mode: settings.context_mode,
            assistant_name: settings.assistant_name.clone(),
            max_message_chars: settings.max_message_chars,
            checkpoint_interval: settings.checkpoint_interval(),
            timeout: None,
        }
    }
}

/// What a caller gets back. Always carries text, real or degraded.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReply {
    pub reply_text: String,
    pub latency_ms: u64,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

struct TurnInput {
    caller_id: String,
    display_name: String,
    message: String,
    attachment: Option<String>,
    started: Instant,
}

struct Inner {
    dispatcher: ProcessDispatcher,
    config: OrchestratorConfig,
    session: Arc<tokio::sync::Mutex<ConversationSession>>,
    /// Last committed state, readable without waiting for an in-flight turn.
    published: Mutex<ConversationSession>,
    writer: Option<SnapshotWriter>,
    closed: AtomicBool,
    /// Callers waiting for the session lock.
    waiting: AtomicUsize,
    /// Process epoch and profile that last received the whole conversation
    /// and every turn since. Only tracked in process-memory mode.
    primed: Mutex<Option<(u64, String)>>,
}

/// Counts a caller as waiting until dropped.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SessionOrchestrator {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl SessionOrchestrator {
    /// In-memory orchestrator without persistence.
    pub fn new(dispatcher: ProcessDispatcher, config: OrchestratorConfig) -> Self {
        let session = ConversationSession::new(config.limits, Utc::now());
        Self::assemble(dispatcher, config, session, None)
    }

    /// Orchestrator persisting to `repo`. Restores the stored session if it
    /// has not expired; an unreadable snapshot is logged and replaced.
    pub async fn with_store(
        dispatcher: ProcessDispatcher,
        config: OrchestratorConfig,
        repo: SessionStateRepo,
    ) -> Self {
        let writer = SnapshotWriter::spawn(repo, SHARED_SESSION_KEY);
        let now = Utc::now();
        let session = match writer.load().await {
            Ok(Some(snapshot)) => {
                let restored = ConversationSession::restore(snapshot, config.limits);
                if restored.is_expired(now) {
                    info!(session_id = %restored.id(), "stored session expired, starting a new one");
                    ConversationSession::new(config.limits, now)
                } else {
                    info!(
                        session_id = %restored.id(),
                        messages = restored.message_count(),
                        "restored conversation session"
                    );
                    restored
                }
            }
            Ok(None) => ConversationSession::new(config.limits, now),
            Err(e) => {
                warn!(error = %e, "could not load stored session, starting a new one");
                ConversationSession::new(config.limits, now)
            }
        };
        Self::assemble(dispatcher, config, session, Some(writer))
    }

    fn assemble(
        dispatcher: ProcessDispatcher,
        config: OrchestratorConfig,
        session: ConversationSession,
        writer: Option<SnapshotWriter>,
    ) -> Self {
        let inner = Arc::new(Inner {
            dispatcher,
            published: Mutex::new(session.clone()),
            session: Arc::new(tokio::sync::Mutex::new(session)),
            config,
            writer,
            closed: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            primed: Mutex::new(None),
        });
        let cancel = CancellationToken::new();
        let maintenance = (!inner.config.checkpoint_interval.is_zero())
            .then(|| tokio::spawn(maintenance_loop(inner.clone(), cancel.clone())));
        Self {
            inner,
            cancel,
            maintenance: Mutex::new(maintenance),
        }
    }

    /// Deliver one message into the shared conversation and wait for the reply.
    ///
    /// Dispatch failures are not errors: they come back as a degraded reply.
    /// Errors are reserved for malformed input and a shut-down orchestrator.
    #[instrument(skip_all, fields(caller_id = %caller_id))]
    pub async fn send(
        &self,
        caller_id: &str,
        display_name: &str,
        message: &str,
        attachment: Option<&str>,
    ) -> Result<SendReply, EngineError> {
        let started = Instant::now();
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        let caller_id = caller_id.trim();
        if caller_id.is_empty() {
            return Err(EngineError::InvalidRequest("callerId is required".into()));
        }
        let attachment = attachment.filter(|a| !a.trim().is_empty());
        if message.trim().is_empty() && attachment.is_none() {
            return Err(EngineError::InvalidRequest("message is empty".into()));
        }
        let display_name = match display_name.trim() {
            "" => caller_id,
            name => name,
        };

        let input = TurnInput {
            caller_id: caller_id.to_string(),
            display_name: display_name.to_string(),
            message: self.inner.guard_length(message),
            attachment: attachment.map(str::to_string),
            started,
        };

        let guard = {
            let _waiting = Waiting::enter(&self.inner.waiting);
            self.inner.session.clone().lock_owned().await
        };
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.turn(guard, input).await })
            .await
            .map_err(|e| EngineError::Internal(format!("turn task failed: {e}")))
    }

    /// Replace the session with a fresh one. Waits for any in-flight turn.
    pub async fn reset_session(&self) -> SessionId {
        let mut session = self.inner.session.lock().await;
        self.inner.rotate(&mut session, Utc::now(), "manual reset").await;
        session.id().clone()
    }

    /// Callers waiting behind the turn in flight.
    pub fn queued(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.published.lock().stats(Utc::now())
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.inner.published.lock().snapshot()
    }

    pub fn dispatcher(&self) -> &ProcessDispatcher {
        &self.inner.dispatcher
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        self.inner.dispatcher.monitor()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop maintenance, let the in-flight turn finish, flush the session and
    /// stop the process. Later sends are refused. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "session maintenance task failed");
            }
        }
        {
            let session = self.inner.session.lock().await;
            if let Some(writer) = &self.inner.writer {
                writer.submit(session.snapshot());
            }
        }
        if let Some(writer) = &self.inner.writer {
            writer.shutdown().await;
        }
        self.inner.dispatcher.shutdown().await;
        info!("orchestrator shut down");
    }
}

impl Inner {
    async fn turn(&self, mut session: OwnedMutexGuard<ConversationSession>, input: TurnInput) -> SendReply {
        let now = Utc::now();
        if session.is_expired(now) {
            self.rotate(&mut session, now, "idle timeout").await;
        }

        let mut staged = session.clone();
        let first = staged.message_count() == 0;
        let history_text = match input.attachment {
            Some(_) => format!("{} [attachment]", input.message),
            None => input.message.clone(),
        };
        let context =
            staged.append_and_build_context(&input.caller_id, &input.display_name, &history_text, now);
        let mut call = self.compose_call(context, &input, first);
        if let Some(timeout) = self.config.timeout {
            call = call.with_timeout(timeout);
        }
        let result = self.dispatcher.execute(call).await;
        let latency_ms = input.started.elapsed().as_millis() as u64;

        match result {
            Ok(dispatched) => {
                if self.config.context_mode == ContextMode::ProcessMemory {
                    *self.primed.lock() = Some((self.dispatcher.process_epoch(), dispatched.profile.clone()));
                }
                staged.append_reply(&self.config.assistant_name, &dispatched.text, Utc::now());
                *session = staged;
                self.publish(&session);
                debug!(
                    session_id = %session.id(),
                    messages = session.message_count(),
                    "turn committed"
                );
                SendReply {
                    reply_text: dispatched.text,
                    latency_ms,
                    degraded: false,
                    failure: None,
                    session_id: session.id().clone(),
                    request_id: Some(dispatched.request_id),
                    profile: Some(dispatched.profile),
                }
            }
            Err(e) => {
                warn!(
                    caller_id = %input.caller_id,
                    kind = %e.kind,
                    error = %e.detail,
                    "returning degraded reply"
                );
                SendReply {
                    reply_text: degraded_reply(e.kind, &input.message),
                    latency_ms,
                    degraded: true,
                    failure: Some(e.kind),
                    session_id: session.id().clone(),
                    request_id: None,
                    profile: None,
                }
            }
        }
    }

    /// In process-memory mode a primed process only gets the new line; the
    /// whole context rides along for any attempt that reaches a fresh process.
    fn compose_call(&self, context: String, input: &TurnInput, first: bool) -> Call {
        let full = with_attachment(context, input);
        if self.config.context_mode == ContextMode::ProcessMemory && !first && self.process_primed() {
            let line = with_attachment(format!("{}: {}", input.display_name, input.message), input);
            return Call::new(input.caller_id.clone(), line).with_recovery_payload(full);
        }
        Call::new(input.caller_id.clone(), full)
    }

    /// Whether the process the next call starts on has seen every turn so far.
    fn process_primed(&self) -> bool {
        if !self.dispatcher.retains_context() {
            return false;
        }
        let Some(primary) = self.dispatcher.profiles().first() else {
            return false;
        };
        match &*self.primed.lock() {
            Some((epoch, profile)) => *epoch == self.dispatcher.process_epoch() && *profile == primary.name,
            None => false,
        }
    }

    fn guard_length(&self, message: &str) -> String {
        let max = self.config.max_message_chars;
        match message.char_indices().nth(max) {
            Some((idx, _)) => {
                warn!(
                    chars = message.chars().count(),
                    max, "message too long, truncating"
                );
                message[..idx].to_string()
            }
            None => message.to_string(),
        }
    }

    async fn rotate(&self, session: &mut ConversationSession, now: DateTime<Utc>, reason: &str) {
        let previous = session.id().clone();
        *session = ConversationSession::new(self.config.limits, now);
        info!(
            previous = %previous,
            session_id = %session.id(),
            reason,
            "conversation session rotated"
        );
        self.publish(session);
        // The process would otherwise keep remembering the old conversation.
        if self.config.context_mode == ContextMode::ProcessMemory {
            self.dispatcher.restart_process(None).await;
        }
    }

    fn publish(&self, session: &ConversationSession) {
        *self.published.lock() = session.clone();
        if let Some(writer) = &self.writer {
            writer.submit(session.snapshot());
        }
    }

    async fn checkpoint(&self) {
        let mut session = self.session.lock().await;
        let now = Utc::now();
        if session.is_expired(now) {
            self.rotate(&mut session, now, "idle timeout").await;
        } else if let Some(writer) = &self.writer {
            writer.submit(session.snapshot());
            debug!(session_id = %session.id(), "session checkpoint");
        }
    }
}

fn with_attachment(mut prompt: String, input: &TurnInput) -> String {
    if let Some(attachment) = &input.attachment {
        prompt.push_str(&format!(
            "\n\n## Attachment from {}\n{}",
            input.display_name, attachment
        ));
    }
    prompt
}

async fn maintenance_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let period = inner.config.checkpoint_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => inner.checkpoint().await,
        }
    }
    debug!("session maintenance stopped");
}
