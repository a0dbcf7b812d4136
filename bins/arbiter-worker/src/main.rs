mod batch;
mod compile;
mod engine;

use anyhow::Result;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use arbiter_common::broker;
use arbiter_common::protocol::{JobRequest, ReplyEnvelope, WorkerEvent};
use arbiter_common::settings::Settings;

use batch::CaseUpdate;
use engine::{Engine, ProcessEngine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Arbiter worker booting...");

    let settings = Settings::from_env();
    info!(worker_id = %settings.worker_id, "Worker identity");

    let client = redis::Client::open(settings.redis_url.as_str())?;
    let mut conn = redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to broker: {}", settings.redis_url);

    // A previous incarnation of this worker may have died mid-job;
    // those payloads go back onto the shared queue before we claim
    // anything new.
    match broker::requeue_orphans(&mut conn, &settings.worker_id).await {
        Ok(0) => {}
        Ok(count) => warn!(count, "Requeued orphaned jobs from a previous run"),
        Err(e) => error!(error = %e, "Failed to requeue orphaned jobs"),
    }

    let engine = ProcessEngine::new(settings.sample_interval_ms);

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        warn!("Received shutdown signal, stopping after the current job");
    };

    tokio::select! {
        _ = worker_loop(&mut conn, &engine, &settings) => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Pull one job at a time off the shared queue. Bounded concurrency is
/// exactly one job per worker instance; parallelism comes from running
/// more workers against the same queue.
async fn worker_loop(
    conn: &mut redis::aio::ConnectionManager,
    engine: &ProcessEngine,
    settings: &Settings,
) -> Result<()> {
    loop {
        // 5 second claim timeout keeps shutdown responsive
        match broker::claim_job(conn, &settings.worker_id, 5.0).await {
            Ok(Some(payload)) => {
                process_job(conn, engine, settings, payload).await;
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Broker error while claiming");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Run one claimed job end to end: batch execution, per-case progress
/// events, one final event, then the acknowledgement. The ack comes
/// last on purpose - dying anywhere before it leaves the payload in the
/// processing list for redelivery.
async fn process_job(
    conn: &mut redis::aio::ConnectionManager,
    engine: &dyn Engine,
    settings: &Settings,
    payload: String,
) {
    let job: JobRequest = match serde_json::from_str(&payload) {
        Ok(job) => job,
        Err(e) => {
            // nothing to reply to; drop the payload so it cannot poison
            // the queue forever
            error!(error = %e, "Unparseable job payload, discarding");
            if let Err(e) = broker::ack_job(conn, &settings.worker_id, &payload).await {
                error!(error = %e, "Failed to discard bad payload");
            }
            return;
        }
    };

    let correlation_id = job.correlation_id;
    info!(
        job_id = %correlation_id,
        language = %job.submission.language,
        cases = job.submission.stdins.len(),
        time_limit_ms = job.submission.time_limit_ms,
        source_size = job.submission.code.len(),
        "Received job"
    );

    // Progress events are published from a forwarder task fed by the
    // batch runner, one per completed case, in case order. The final
    // event is only published after the forwarder drains, so ordering
    // within the job holds.
    let (tx, mut rx) = mpsc::unbounded_channel::<CaseUpdate>();
    let mut publish_conn = conn.clone();
    let reply_to = job.reply_to.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let envelope = ReplyEnvelope {
                correlation_id,
                event: WorkerEvent::Progress {
                    index: update.index,
                    result: update.result,
                },
            };
            if let Err(e) = broker::publish_reply(&mut publish_conn, &reply_to, &envelope).await {
                warn!(job_id = %correlation_id, error = %e, "Failed to publish progress event");
            }
        }
    });

    let started = std::time::Instant::now();
    let outcome = batch::run_batch(
        engine,
        &job.submission,
        job.meta.expected.as_deref(),
        job.meta.early_stop,
        Some(&tx),
    )
    .await;
    drop(tx);
    let _ = forwarder.await;

    let event = match outcome {
        Ok(results) => {
            info!(
                job_id = %correlation_id,
                results = results.len(),
                execution_ms = started.elapsed().as_millis() as u64,
                "Batch completed"
            );
            for (index, result) in results.iter().enumerate() {
                debug!(
                    job_id = %correlation_id,
                    case = index,
                    exit_code = result.exit_code,
                    duration_ms = result.duration_ms,
                    timed_out = result.timed_out,
                    "Case result"
                );
            }
            WorkerEvent::Final {
                results,
                error: None,
            }
        }
        Err(e) => {
            error!(job_id = %correlation_id, error = %e, "Batch execution failed");
            WorkerEvent::Final {
                results: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    };

    let envelope = ReplyEnvelope {
        correlation_id,
        event,
    };
    if let Err(e) = broker::publish_reply(conn, &job.reply_to, &envelope).await {
        error!(job_id = %correlation_id, error = %e, "Failed to publish final event");
    }

    if let Err(e) = broker::ack_job(conn, &settings.worker_id, &payload).await {
        error!(job_id = %correlation_id, error = %e, "Failed to acknowledge job");
    }
}
