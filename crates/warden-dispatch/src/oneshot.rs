//! Per-call transport: one short-lived process per exchange.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use warden_core::{DispatchError, ExecutionProfile};

use crate::process::{parse_output, AgentProcess, ProcessCommand, ProcessError, MAX_OUTPUT_BYTES};

const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// Spawns the binary for every exchange, writes the prompt to stdin and reads
/// the reply from stdout. Conversation memory lives entirely in the prompt.
pub struct OneShotProcess {
    command: ProcessCommand,
}

impl OneShotProcess {
    pub fn new(command: ProcessCommand) -> Self {
        Self { command }
    }

    async fn run(&self, profile: &ExecutionProfile, prompt: &str) -> Result<String, ProcessError> {
        let mut child = self
            .command
            .command_for(profile)
            .spawn()
            .map_err(|e| self.command.spawn_error(e))?;
        let pid = child.id();
        debug!(pid, profile = %profile.name, "spawned agent process");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::Protocol("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Protocol("stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Protocol("stderr not captured".into()))?;

        let write = async move {
            match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                // The process may exit without reading its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                Err(e) => Err(e),
            }
        };
        let read_out = async move {
            let mut buf = Vec::new();
            stdout.take(MAX_OUTPUT_BYTES as u64).read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };
        let read_err = async move {
            let mut buf = Vec::new();
            stderr.take(MAX_STDERR_BYTES).read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };

        let (written, out, err) = tokio::join!(write, read_out, read_err);
        written?;
        let out = out?;
        let err = err?;

        if out.len() >= MAX_OUTPUT_BYTES {
            warn!(pid, limit = MAX_OUTPUT_BYTES, "agent output truncated, killing process");
            let _ = child.start_kill();
        }
        let status = child.wait().await?;

        let stdout = String::from_utf8_lossy(&out).into_owned();
        if status.success() || out.len() >= MAX_OUTPUT_BYTES {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&err);
        let output = if stderr.trim().is_empty() {
            stdout
        } else {
            format!("{}\n{}", stderr.trim(), stdout.trim())
        };
        Err(ProcessError::Exited {
            code: status.code(),
            output,
        })
    }
}

#[async_trait]
impl AgentProcess for OneShotProcess {
    async fn exchange(&self, profile: &ExecutionProfile, prompt: &str) -> Result<String, DispatchError> {
        let stdout = self.run(profile, prompt).await?;
        parse_output(&stdout)
    }

    async fn reset(&self, _profile: &ExecutionProfile) {}

    async fn shutdown(&self) {}

    fn name(&self) -> &str {
        "per_call"
    }

    fn retains_context(&self) -> bool {
        false
    }
}
