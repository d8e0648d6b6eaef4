//! Seam between the dispatcher and the external agent process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use warden_core::classify::classify_or_unknown;
use warden_core::{DispatchError, ExecutionProfile, FailureKind};

/// Captured stdout is cut off beyond this size.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// One request/response exchange with the external process.
///
/// Implementations do not apply a deadline: the dispatcher wraps every
/// exchange in its own timeout and drops the future when it fires, then
/// calls [`AgentProcess::reset`] if the error asks for a restart.
#[async_trait]
pub trait AgentProcess: Send + Sync {
    async fn exchange(&self, profile: &ExecutionProfile, prompt: &str) -> Result<String, DispatchError>;

    /// Discard whatever process instance serves `profile`.
    async fn reset(&self, profile: &ExecutionProfile);

    /// Stop every process instance.
    async fn shutdown(&self);

    fn name(&self) -> &str;

    /// False when every exchange starts a fresh process.
    fn retains_context(&self) -> bool {
        true
    }
}

/// Transport-level failures, before classification.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("binary not found: {0}")]
    NotFound(String),
    #[error("failed to spawn: {0}")]
    Spawn(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("process exited with {code:?}: {output}")]
    Exited { code: Option<i32>, output: String },
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<ProcessError> for DispatchError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::NotFound(path) => {
                DispatchError::new(FailureKind::BinaryNotFound, format!("{path}: not found"))
            }
            ProcessError::Spawn(err) => DispatchError::new(FailureKind::UnknownProcessError, err.to_string()),
            ProcessError::Io(err) => {
                DispatchError::new(FailureKind::UnknownProcessError, err.to_string()).with_restart()
            }
            ProcessError::Exited { code, output } => {
                let kind = classify_or_unknown(&output);
                DispatchError::new(kind, format!("exit {code:?}: {}", truncate(&output, 500)))
            }
            ProcessError::Protocol(msg) => {
                DispatchError::new(FailureKind::UnknownProcessError, msg).with_restart()
            }
        }
    }
}

/// How to start the agent binary.
#[derive(Clone, Debug)]
pub struct ProcessCommand {
    pub binary: String,
    pub args: Vec<String>,
    /// Environment variable that receives the profile credential.
    pub credentials_env: String,
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            credentials_env: "AGENT_API_KEY".to_string(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments for one profile: configured args, then `--model` and `--settings` when set.
    pub fn args_for(&self, profile: &ExecutionProfile) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(model) = &profile.model_id {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(settings) = &profile.settings_ref {
            args.push("--settings".to_string());
            args.push(settings.clone());
        }
        args
    }

    /// Piped stdio, killed when dropped.
    pub fn command_for(&self, profile: &ExecutionProfile) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(self.args_for(profile))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(credential) = &profile.credentials {
            cmd.env(&self.credentials_env, credential.expose());
        }
        cmd
    }

    pub fn spawn_error(&self, err: std::io::Error) -> ProcessError {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ProcessError::NotFound(self.binary.clone())
            }
            _ => ProcessError::Spawn(err),
        }
    }
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ANSI pattern"));

/// Turn raw stdout into reply text.
///
/// A JSON object carrying `result`, `content` or `text` is unwrapped to that
/// field; an object flagged `"is_error": true` becomes a classified failure.
/// Anything else is returned trimmed with terminal escapes removed.
pub fn parse_output(stdout: &str) -> Result<String, DispatchError> {
    let cleaned = ANSI_ESCAPE.replace_all(stdout, "");
    let trimmed = cleaned.trim();

    if trimmed.starts_with('{') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(trimmed) {
            let text = ["result", "content", "text"]
                .iter()
                .find_map(|k| map.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string);
            let is_error = map.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
            if is_error {
                let detail = text.unwrap_or_else(|| trimmed.to_string());
                return Err(DispatchError::new(classify_or_unknown(&detail), truncate(&detail, 500)));
            }
            if let Some(text) = text {
                return Ok(text.trim().to_string());
            }
        }
    }

    if trimmed.is_empty() {
        return Err(DispatchError::new(FailureKind::UnknownProcessError, "empty reply"));
    }
    Ok(trimmed.to_string())
}

/// Cut `s` to at most `max` chars on a char boundary.
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
