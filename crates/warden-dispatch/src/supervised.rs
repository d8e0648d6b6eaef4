//! Supervised transport: one long-lived process per profile.
//!
//! Frames are single JSON lines. Requests are `{"id":N,"prompt":"..."}` and
//! replies are `{"id":N,"ok":true,"text":"..."}` or
//! `{"id":N,"ok":false,"error":"..."}`. Replies for other ids are stale and
//! skipped; non-JSON lines are treated as process chatter.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};
use warden_core::classify::classify_or_unknown;
use warden_core::{DispatchError, ExecutionProfile};

use crate::process::{parse_output, truncate, AgentProcess, ProcessCommand, ProcessError, MAX_OUTPUT_BYTES};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct RequestFrame<'a> {
    id: u64,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct ReplyFrame {
    id: u64,
    ok: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

struct Worker {
    child: Child,
    writer: FramedWrite<ChildStdin, LinesCodec>,
    reader: FramedRead<ChildStdout, LinesCodec>,
}

impl Worker {
    async fn round_trip(&mut self, id: u64, line: String) -> Result<String, DispatchError> {
        if let Err(e) = self.writer.send(line).await {
            return Err(ProcessError::Protocol(format!("write failed: {e}")).into());
        }
        loop {
            let line = match self.reader.next().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Err(ProcessError::Protocol(format!("read failed: {e}")).into()),
                None => {
                    let code = self.child.try_wait().ok().flatten().and_then(|s| s.code());
                    return Err(ProcessError::Protocol(format!("process exited (code {code:?})")).into());
                }
            };
            let Ok(frame) = serde_json::from_str::<ReplyFrame>(&line) else {
                debug!(line = %truncate(&line, 200), "ignoring non-frame output");
                continue;
            };
            if frame.id != id {
                debug!(expected = id, got = frame.id, "discarding stale reply");
                continue;
            }
            if frame.ok {
                return parse_output(frame.text.as_deref().unwrap_or_default());
            }
            let detail = frame
                .error
                .or(frame.text)
                .unwrap_or_else(|| "unspecified error".to_string());
            return Err(DispatchError::new(classify_or_unknown(&detail), truncate(&detail, 500)));
        }
    }
}

pub struct SupervisedProcess {
    command: ProcessCommand,
    workers: Mutex<HashMap<String, Worker>>,
    next_id: AtomicU64,
    starts: AtomicU64,
}

impl SupervisedProcess {
    pub fn new(command: ProcessCommand) -> Self {
        Self {
            command,
            workers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            starts: AtomicU64::new(0),
        }
    }

    /// Processes started so far, restarts included.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    fn spawn_worker(&self, profile: &ExecutionProfile) -> Result<Worker, ProcessError> {
        let mut child = self
            .command
            .command_for(profile)
            .spawn()
            .map_err(|e| self.command.spawn_error(e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::Protocol("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Protocol("stdout not captured".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let profile = profile.name.clone();
            tokio::spawn(async move {
                let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(64 * 1024));
                while let Some(Ok(line)) = lines.next().await {
                    debug!(profile = %profile, line = %line, "agent stderr");
                }
            });
        }

        self.starts.fetch_add(1, Ordering::Relaxed);
        info!(pid = child.id(), profile = %profile.name, "started supervised agent process");
        Ok(Worker {
            child,
            writer: FramedWrite::new(stdin, LinesCodec::new()),
            reader: FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_OUTPUT_BYTES)),
        })
    }
}

#[async_trait]
impl AgentProcess for SupervisedProcess {
    async fn exchange(&self, profile: &ExecutionProfile, prompt: &str) -> Result<String, DispatchError> {
        let mut workers = self.workers.lock().await;
        let worker = match workers.entry(profile.name.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(self.spawn_worker(profile)?),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&RequestFrame { id, prompt })
            .map_err(|e| ProcessError::Protocol(format!("encode frame: {e}")))?;

        let result = worker.round_trip(id, line).await;
        if let Err(e) = &result {
            if e.restart_required {
                warn!(profile = %profile.name, error = %e, "supervised process unusable, discarding");
                workers.remove(&profile.name);
            }
        }
        result
    }

    async fn reset(&self, profile: &ExecutionProfile) {
        if self.workers.lock().await.remove(&profile.name).is_some() {
            info!(profile = %profile.name, "supervised process killed for restart");
        }
    }

    async fn shutdown(&self) {
        let workers: Vec<(String, Worker)> = self.workers.lock().await.drain().collect();
        for (profile, worker) in workers {
            let Worker { mut child, writer, .. } = worker;
            // Closing stdin asks the process to exit on its own.
            drop(writer);
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => debug!(profile = %profile, "supervised process exited"),
                Err(_) => {
                    warn!(profile = %profile, "supervised process did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }

    fn name(&self) -> &str {
        "supervised"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use warden_core::FailureKind;

    const ECHO_PID: &str = r#"while IFS= read -r line; do id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/'); printf '{"id":%s,"ok":true,"text":"pid %s"}\n' "$id" "$$"; done"#;

    fn sh(script: &str) -> SupervisedProcess {
        SupervisedProcess::new(ProcessCommand::new("sh").with_args(["-c", script]))
    }

    #[tokio::test]
    async fn process_is_reused_across_exchanges() {
        let process = sh(ECHO_PID);
        let profile = ExecutionProfile::named("primary");
        let first = process.exchange(&profile, "one").await.unwrap();
        let second = process.exchange(&profile, "two").await.unwrap();
        assert!(first.starts_with("pid "));
        assert_eq!(first, second);
        assert_eq!(process.starts(), 1);
        process.shutdown().await;
    }

    #[tokio::test]
    async fn reset_starts_a_new_process() {
        let process = sh(ECHO_PID);
        let profile = ExecutionProfile::named("primary");
        let first = process.exchange(&profile, "one").await.unwrap();
        process.reset(&profile).await;
        let second = process.exchange(&profile, "two").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(process.starts(), 2);
        process.shutdown().await;
    }

    #[tokio::test]
    async fn separate_process_per_profile() {
        let process = sh(ECHO_PID);
        let a = process.exchange(&ExecutionProfile::named("a"), "x").await.unwrap();
        let b = process.exchange(&ExecutionProfile::named("b"), "x").await.unwrap();
        assert_ne!(a, b);
        process.shutdown().await;
    }

    #[tokio::test]
    async fn stale_frames_and_chatter_are_skipped() {
        let process = sh(
            r#"while IFS= read -r line; do id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/'); echo "warming up"; printf '{"id":999,"ok":true,"text":"stale"}\n'; printf '{"id":%s,"ok":true,"text":"fresh"}\n' "$id"; done"#,
        );
        let reply = process.exchange(&ExecutionProfile::named("p"), "q").await.unwrap();
        assert_eq!(reply, "fresh");
        process.shutdown().await;
    }

    #[tokio::test]
    async fn error_frame_is_classified_and_keeps_process() {
        let process = sh(
            r#"while IFS= read -r line; do id=$(printf '%s' "$line" | sed 's/^{"id":\([0-9]*\).*/\1/'); printf '{"id":%s,"ok":false,"error":"rate_limit_error: slow down"}\n' "$id"; done"#,
        );
        let profile = ExecutionProfile::named("p");
        let err = process.exchange(&profile, "q").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::RateLimited);
        assert!(!err.restart_required);
        process.exchange(&profile, "q").await.unwrap_err();
        assert_eq!(process.starts(), 1);
        process.shutdown().await;
    }

    #[tokio::test]
    async fn crash_requires_restart() {
        let process = sh("read -r line; exit 3");
        let profile = ExecutionProfile::named("p");
        let err = process.exchange(&profile, "q").await.unwrap_err();
        assert_eq!(err.kind, FailureKind::UnknownProcessError);
        assert!(err.restart_required);

        process.exchange(&profile, "q").await.unwrap_err();
        assert_eq!(process.starts(), 2);
    }

    #[tokio::test]
    async fn missing_binary() {
        let process = SupervisedProcess::new(ProcessCommand::new("/nonexistent/warden-agent-binary"));
        let err = process
            .exchange(&ExecutionProfile::named("p"), "q")
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::BinaryNotFound);
        assert_eq!(process.starts(), 0);
    }
}
