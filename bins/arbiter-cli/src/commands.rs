// CLI commands for talking to the judge over the broker

use anyhow::{bail, Context, Result};

use arbiter_common::protocol::{JobMeta, WorkerEvent};
use arbiter_common::rpc::RpcClient;
use arbiter_common::settings::Settings;
use arbiter_common::types::{ExecutionResult, Language, Submission};
use arbiter_common::verdict::{classify, VerdictMarkers};

#[allow(clippy::too_many_arguments)]
pub async fn submit(
    file: &str,
    language: Language,
    stdins: Vec<String>,
    expected: Vec<String>,
    time_limit_ms: u64,
    wall_time_limit_ms: Option<u64>,
    memory_limit_mb: u64,
    early_stop: bool,
    json: bool,
) -> Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read source file '{}'", file))?;

    let stdins = if stdins.is_empty() {
        vec![String::new()]
    } else {
        stdins
    };
    let expected = if expected.is_empty() {
        None
    } else {
        Some(expected)
    };

    let submission = Submission {
        language,
        code,
        stdins: stdins.clone(),
        time_limit_ms,
        wall_time_limit_ms,
        memory_limit_mb,
        token: None,
    };
    let meta = JobMeta::ad_hoc(stdins.len(), expected.clone(), early_stop);

    let settings = Settings::from_env();
    let (client, _replies) = RpcClient::connect(&settings)
        .await
        .context("Failed to connect to broker")?;

    println!("→ Submitting {} ({} cases)", file, stdins.len());

    let reply = client
        .call(submission, meta)
        .await
        .context("Judging call failed")?;

    match reply {
        WorkerEvent::Final {
            error: Some(error), ..
        } => bail!("Judging failed: {}", error),
        WorkerEvent::Final { results, .. } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_table(&results, expected.as_deref());
            }
            Ok(())
        }
        WorkerEvent::Progress { .. } => bail!("Unexpected reply from worker"),
    }
}

fn print_table(results: &[ExecutionResult], expected: Option<&[String]>) {
    let markers = VerdictMarkers::default();
    let mut passed = 0usize;

    for (index, result) in results.iter().enumerate() {
        let expected_case = expected.and_then(|e| e.get(index)).map(String::as_str);
        let status = classify(result, expected_case, &markers);
        if status == arbiter_common::verdict::VerdictStatus::Success {
            passed += 1;
        }

        println!(
            "#{} {} exit={} {}ms {}KB{}",
            index + 1,
            status,
            result.exit_code,
            result.duration_ms,
            result.memory_used_kb,
            if result.timed_out { " (timed out)" } else { "" },
        );
        if !result.stdout.is_empty() {
            println!("  stdout: {}", result.stdout.trim_end());
        }
        if !result.stderr.is_empty() {
            println!("  stderr: {}", result.stderr.trim_end());
        }
    }

    println!();
    println!("→ {}/{} cases passed", passed, results.len());
}
