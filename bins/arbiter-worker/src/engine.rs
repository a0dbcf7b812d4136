//! Process execution engine.
//!
//! The engine knows HOW to compile and run one case: spawn the right
//! command for the artifact, feed stdin, enforce the deadline, sample
//! peak memory. It knows nothing about batches, scoring, or the broker.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use arbiter_common::types::{ExecutionResult, Language};

use crate::compile::{self, Artifact, CompileError};

/// Execution backend seam: the batch runner drives whatever implements
/// this, so tests can script outcomes without spawning processes.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn compile(&self, language: Language, source: &str) -> Result<Artifact, CompileError>;

    /// Run one artifact against one stdin under a hard deadline.
    /// Always yields exactly one result; the only error is a failure to
    /// launch at all (missing runtime, unusable artifact).
    async fn run_case(
        &self,
        artifact: &Artifact,
        stdin: &str,
        time_limit_ms: u64,
    ) -> Result<ExecutionResult>;
}

/// Runs submissions as plain child processes on the (already isolated)
/// execution host.
pub struct ProcessEngine {
    sample_interval: Duration,
}

impl ProcessEngine {
    pub fn new(sample_interval_ms: u64) -> Self {
        ProcessEngine {
            sample_interval: Duration::from_millis(sample_interval_ms.max(1)),
        }
    }
}

#[async_trait]
impl Engine for ProcessEngine {
    async fn compile(&self, language: Language, source: &str) -> Result<Artifact, CompileError> {
        compile::compile(language, source).await
    }

    async fn run_case(
        &self,
        artifact: &Artifact,
        stdin: &str,
        time_limit_ms: u64,
    ) -> Result<ExecutionResult> {
        let mut command = run_command(artifact);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to launch {:?}", artifact))?;

        // Write the whole stdin and close the pipe so a program asking
        // for more input sees end-of-stream instead of hanging. The
        // child may exit without reading; a broken pipe is fine.
        if let Some(mut pipe) = child.stdin.take() {
            let payload = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&payload).await;
                let _ = pipe.shutdown().await;
            });
        }

        let stdout_task = drain_pipe(child.stdout.take());
        let stderr_task = drain_pipe(child.stderr.take());

        let (stop_tx, stop_rx) = oneshot::channel();
        let sampler: Option<JoinHandle<u64>> = child
            .id()
            .map(|pid| tokio::spawn(sample_peak_rss(pid, self.sample_interval, stop_rx)));

        let deadline = Duration::from_millis(time_limit_ms);
        let (status, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => {
                warn!(error = %e, "wait on child failed");
                (None, false)
            }
            Err(_) => {
                debug!(time_limit_ms, "deadline expired, killing process");
                let _ = child.start_kill();
                (child.wait().await.ok(), true)
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let _ = stop_tx.send(());
        let memory_used_kb = match sampler {
            Some(handle) => handle.await.unwrap_or(0),
            None => 0,
        };

        // Pipes hit EOF once the process is gone, so this drains
        // whatever was produced before a kill as well.
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ExecutionResult {
            request_id: Uuid::new_v4(),
            stdout,
            stderr,
            exit_code: exit_code_of(status),
            duration_ms,
            memory_used_kb,
            timed_out,
        })
    }
}

fn run_command(artifact: &Artifact) -> Command {
    match artifact {
        Artifact::Script(path) => {
            let mut command = Command::new("python3");
            command.arg(path);
            command
        }
        Artifact::Binary(path) => Command::new(path),
        Artifact::ClassDir { dir, class } => {
            let mut command = Command::new("java");
            command.arg("-cp").arg(dir).arg(class);
            command
        }
    }
}

fn drain_pipe<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn exit_code_of(status: Option<std::process::ExitStatus>) -> i32 {
    match status {
        Some(status) => status
            .code()
            .or_else(|| signal_code(&status))
            .unwrap_or(-1),
        None => -1,
    }
}

#[cfg(unix)]
fn signal_code(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| -sig)
}

#[cfg(not(unix))]
fn signal_code(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Best-effort peak-RSS poller. Races process exit by design: once the
/// proc entry stops being readable it quietly returns the last peak
/// (zero if it never got a reading).
async fn sample_peak_rss(pid: u32, interval: Duration, mut stop: oneshot::Receiver<()>) -> u64 {
    let path = format!("/proc/{}/status", pid);
    let mut peak = 0u64;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = tokio::time::sleep(interval) => {
                match tokio::fs::read_to_string(&path).await {
                    Ok(status) => {
                        if let Some(kb) = vm_rss_kb(&status) {
                            peak = peak.max(kb);
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
    peak
}

fn vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn shell_artifact(dir: &tempfile::TempDir, body: &str) -> Artifact {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("prog.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        Artifact::Binary(path)
    }

    #[test]
    fn parses_vm_rss_line() {
        let status = "Name:\tcat\nVmPeak:\t 1000 kB\nVmRSS:\t  4321 kB\n";
        assert_eq!(vm_rss_kb(status), Some(4321));
        assert_eq!(vm_rss_kb("Name:\tcat\n"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn echoes_stdin_and_sees_eof() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = shell_artifact(&dir, "cat");
        let engine = ProcessEngine::new(10);

        let result = engine.run_case(&artifact, "hi\n", 5_000).await.unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert!(result.stderr.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kills_on_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = shell_artifact(&dir, "while :; do :; done");
        let engine = ProcessEngine::new(10);

        let result = engine.run_case(&artifact, "", 200).await.unwrap();
        assert!(result.timed_out);
        assert_ne!(result.exit_code, 0);
        assert!(result.duration_ms >= 200);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fast_run_is_not_marked_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = shell_artifact(&dir, "echo ok");
        let engine = ProcessEngine::new(10);

        let result = engine.run_case(&artifact, "", 5_000).await.unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.stdout, "ok\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = shell_artifact(&dir, "echo oops 1>&2; exit 3");
        let engine = ProcessEngine::new(10);

        let result = engine.run_case(&artifact, "", 5_000).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr.contains("oops"));
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_before_kill_is_drained() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = shell_artifact(&dir, "echo early; while :; do :; done");
        let engine = ProcessEngine::new(10);

        let result = engine.run_case(&artifact, "", 300).await.unwrap();
        assert!(result.timed_out);
        assert!(result.stdout.contains("early"));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[ignore] // requires python3 on the host
    async fn python_echo_roundtrip() {
        let engine = ProcessEngine::new(10);
        let artifact = engine
            .compile(Language::Python, "print(input())")
            .await
            .unwrap();

        let result = engine.run_case(&artifact, "hi\n", 5_000).await.unwrap();
        artifact.cleanup();

        assert_eq!(result.stdout.trim(), "hi");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let engine = ProcessEngine::new(10);
        let artifact = Artifact::Binary("/definitely/not/here".into());
        assert!(engine.run_case(&artifact, "", 1_000).await.is_err());
    }
}
