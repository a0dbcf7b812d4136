//! Batch runner: compile once, run every stdin in order against the
//! same artifact, under a shared wall-clock budget with optional
//! early-stop, pushing one notification per completed case.

use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use arbiter_common::types::{ExecutionResult, Submission};

use crate::compile::{Artifact, CompileError};
use crate::engine::Engine;

/// One completed case, pushed to the progress sink as soon as the case
/// finishes.
#[derive(Debug, Clone)]
pub struct CaseUpdate {
    pub index: usize,
    pub result: ExecutionResult,
}

/// Removes the artifact on every exit path out of the batch, including
/// errors raised mid-loop.
struct ArtifactGuard(Artifact);

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.0.cleanup();
    }
}

/// Run the whole batch. Returns fewer results than stdins only when
/// early-stop or budget exhaustion cuts the batch short. A rejected
/// compile yields one synthetic failing result per case and never
/// touches the engine's run path; only configuration-level failures
/// (missing toolchain, unlaunchable artifact) surface as `Err`.
pub async fn run_batch<E: Engine + ?Sized>(
    engine: &E,
    submission: &Submission,
    expected: Option<&[String]>,
    early_stop: bool,
    progress: Option<&mpsc::UnboundedSender<CaseUpdate>>,
) -> Result<Vec<ExecutionResult>> {
    let artifact = match engine.compile(submission.language, &submission.code).await {
        Ok(artifact) => artifact,
        Err(CompileError::Failed { diagnostics }) => {
            info!(language = %submission.language, "compilation rejected");
            let mut results = Vec::with_capacity(submission.stdins.len());
            for index in 0..submission.stdins.len() {
                let result = ExecutionResult::compile_failure(&diagnostics);
                notify(progress, index, &result);
                results.push(result);
            }
            return Ok(results);
        }
        Err(e) => return Err(e.into()),
    };
    let guard = ArtifactGuard(artifact);

    let batch_started = Instant::now();
    let mut results = Vec::with_capacity(submission.stdins.len());

    for (index, stdin) in submission.stdins.iter().enumerate() {
        let mut case_limit = submission.time_limit_ms;
        if let Some(budget) = submission.wall_time_limit_ms {
            let elapsed = batch_started.elapsed().as_millis() as u64;
            let remaining = budget.saturating_sub(elapsed);
            if remaining == 0 {
                // budget exhausted: a zero-limit case is never run
                let result = ExecutionResult::budget_exhausted();
                notify(progress, index, &result);
                results.push(result);
                break;
            }
            case_limit = case_limit.min(remaining);
        }

        let result = engine.run_case(&guard.0, stdin, case_limit).await?;
        notify(progress, index, &result);

        let stop = early_stop
            && match expected.and_then(|expected| expected.get(index)) {
                Some(expected) => !case_passed(&result, expected),
                None => false,
            };
        results.push(result);
        if stop {
            break;
        }
    }

    Ok(results)
}

fn case_passed(result: &ExecutionResult, expected: &str) -> bool {
    result.exit_code == 0
        && !result.timed_out
        && result.stderr.is_empty()
        && result.stdout.trim() == expected.trim()
}

fn notify(progress: Option<&mpsc::UnboundedSender<CaseUpdate>>, index: usize, result: &ExecutionResult) {
    if let Some(sink) = progress {
        // a dropped receiver just means nobody is listening
        let _ = sink.send(CaseUpdate {
            index,
            result: result.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use uuid::Uuid;

    use arbiter_common::types::Language;

    /// Scripted engine: canned stdout per case, optional per-case delay
    /// so wall-budget behavior can be exercised with real clocks.
    struct FakeEngine {
        compile_error: Option<String>,
        stdouts: Vec<String>,
        delay: Duration,
        run_calls: AtomicUsize,
        limits_seen: Mutex<Vec<u64>>,
        artifact_path: Mutex<Option<PathBuf>>,
    }

    impl FakeEngine {
        fn new(stdouts: &[&str]) -> Self {
            FakeEngine {
                compile_error: None,
                stdouts: stdouts.iter().map(|s| s.to_string()).collect(),
                delay: Duration::ZERO,
                run_calls: AtomicUsize::new(0),
                limits_seen: Mutex::new(Vec::new()),
                artifact_path: Mutex::new(None),
            }
        }

        fn rejecting(diagnostics: &str) -> Self {
            let mut engine = FakeEngine::new(&[]);
            engine.compile_error = Some(diagnostics.to_string());
            engine
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Engine for FakeEngine {
        async fn compile(&self, _: Language, _: &str) -> Result<Artifact, CompileError> {
            if let Some(diagnostics) = &self.compile_error {
                return Err(CompileError::Failed {
                    diagnostics: diagnostics.clone(),
                });
            }
            let file = tempfile::Builder::new()
                .prefix("fake-artifact-")
                .tempfile()
                .unwrap();
            let path = file.into_temp_path().keep().unwrap();
            *self.artifact_path.lock().unwrap() = Some(path.clone());
            Ok(Artifact::Script(path))
        }

        async fn run_case(
            &self,
            _: &Artifact,
            _: &str,
            time_limit_ms: u64,
        ) -> Result<ExecutionResult> {
            let index = self.run_calls.fetch_add(1, Ordering::SeqCst);
            self.limits_seen.lock().unwrap().push(time_limit_ms);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(ExecutionResult {
                request_id: Uuid::new_v4(),
                stdout: self.stdouts.get(index).cloned().unwrap_or_default(),
                stderr: String::new(),
                exit_code: 0,
                duration_ms: self.delay.as_millis() as u64,
                memory_used_kb: 0,
                timed_out: false,
            })
        }
    }

    fn submission(stdins: usize) -> Submission {
        Submission {
            language: Language::Python,
            code: "print(input())".to_string(),
            stdins: (0..stdins).map(|i| format!("case-{}", i)).collect(),
            time_limit_ms: 1_000,
            wall_time_limit_ms: None,
            memory_limit_mb: 256,
            token: None,
        }
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<CaseUpdate>) -> Vec<usize> {
        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push(update.index);
        }
        seen
    }

    #[tokio::test]
    async fn compile_failure_yields_synthetic_results_without_running() {
        let engine = FakeEngine::rejecting("expected ';'");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let results = run_batch(&engine, &submission(3), None, false, Some(&tx))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for result in &results {
            assert_eq!(result.exit_code, -1);
            assert_eq!(result.stderr, "expected ';'");
            assert_eq!(result.duration_ms, 0);
            assert!(!result.timed_out);
        }
        assert_eq!(engine.run_calls.load(Ordering::SeqCst), 0);
        assert_eq!(collect(&mut rx), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn early_stop_halts_after_first_mismatch() {
        let engine = FakeEngine::new(&["ok", "bad", "never-run"]);
        let expected = vec!["ok".to_string(), "good".to_string(), "x".to_string()];

        let results = run_batch(&engine, &submission(3), Some(&expected), true, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(engine.run_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn without_early_stop_all_cases_run() {
        let engine = FakeEngine::new(&["ok", "bad", "ok"]);
        let expected = vec!["ok".to_string(), "good".to_string(), "ok".to_string()];

        let results = run_batch(&engine, &submission(3), Some(&expected), false, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn wall_budget_exhaustion_cuts_the_batch_short() {
        let engine = FakeEngine::new(&["a", "b", "c", "d"]).with_delay(Duration::from_millis(70));
        let mut sub = submission(4);
        sub.wall_time_limit_ms = Some(100);

        let results = run_batch(&engine, &sub, None, false, None).await.unwrap();

        assert!(results.len() < 4, "budget should stop the batch");
        let last = results.last().unwrap();
        assert!(last.timed_out);
        assert_eq!(last.exit_code, -9);
        assert!(last.stdout.is_empty() && last.stderr.is_empty());
        for earlier in &results[..results.len() - 1] {
            assert!(!earlier.timed_out);
        }
    }

    #[tokio::test]
    async fn remaining_budget_caps_the_case_limit() {
        let engine = FakeEngine::new(&["a", "b"]).with_delay(Duration::from_millis(60));
        let mut sub = submission(2);
        sub.time_limit_ms = 6_000;
        sub.wall_time_limit_ms = Some(5_000);

        run_batch(&engine, &sub, None, false, None).await.unwrap();

        let limits = engine.limits_seen.lock().unwrap().clone();
        // the budget is below the per-case limit from the start
        assert!(limits[0] <= 5_000);
        // the second case starts with at least one case's worth spent
        assert!(limits[1] < limits[0]);
    }

    #[tokio::test]
    async fn case_limit_is_per_case_without_budget() {
        let engine = FakeEngine::new(&["a", "b", "c"]);
        let results = run_batch(&engine, &submission(3), None, false, None)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(engine
            .limits_seen
            .lock()
            .unwrap()
            .iter()
            .all(|&limit| limit == 1_000));
    }

    #[tokio::test]
    async fn progress_arrives_in_index_order() {
        let engine = FakeEngine::new(&["a", "b", "c"]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_batch(&engine, &submission(3), None, false, Some(&tx))
            .await
            .unwrap();

        assert_eq!(collect(&mut rx), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn artifact_is_removed_on_every_path() {
        // normal completion
        let engine = FakeEngine::new(&["a", "b"]);
        run_batch(&engine, &submission(2), None, false, None)
            .await
            .unwrap();
        let path = engine.artifact_path.lock().unwrap().clone().unwrap();
        assert!(!path.exists());

        // early stop
        let engine = FakeEngine::new(&["bad", "x"]);
        let expected = vec!["good".to_string(), "x".to_string()];
        run_batch(&engine, &submission(2), Some(&expected), true, None)
            .await
            .unwrap();
        let path = engine.artifact_path.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
    }
}
