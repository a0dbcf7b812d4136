//! Progress distributor: consumes the reply stream, classifies raw
//! results into verdicts, and fans events out to whoever subscribed to
//! the job's correlation id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use arbiter_common::protocol::{CaseReport, JobMeta, OutboundEvent, ReplyEnvelope, WorkerEvent};
use arbiter_common::types::ExecutionResult;
use arbiter_common::verdict::{classify, VerdictMarkers, VerdictStatus};

use crate::metrics;

#[derive(Debug, PartialEq, Eq)]
enum JobState {
    Pending,
    InProgress,
}

struct JobEntry {
    meta: JobMeta,
    state: JobState,
}

/// Owns the live-job table and the subscriber table. Both are
/// process-wide state with a connect/complete lifecycle, encapsulated
/// here instead of living as ambient globals.
pub struct Distributor {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    subscribers: Mutex<HashMap<Uuid, Vec<mpsc::UnboundedSender<OutboundEvent>>>>,
    markers: VerdictMarkers,
}

impl Distributor {
    pub fn new(markers: VerdictMarkers) -> Self {
        Distributor {
            jobs: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            markers,
        }
    }

    /// Track a dispatched job. Must happen before the job is pushed to
    /// the broker, or the first event could race the registration and
    /// be dropped as unknown.
    pub async fn register(&self, correlation_id: Uuid, meta: JobMeta) {
        self.jobs.lock().await.insert(
            correlation_id,
            JobEntry {
                meta,
                state: JobState::Pending,
            },
        );
    }

    /// Open a transport channel onto a job's event stream. The channel
    /// dies silently with the subscriber; pending events are dropped,
    /// never queued, for ids nobody watches.
    pub async fn subscribe(&self, correlation_id: Uuid) -> mpsc::UnboundedReceiver<OutboundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .entry(correlation_id)
            .or_default()
            .push(tx);
        rx
    }

    /// Route one reply envelope. Events for unknown correlation ids
    /// (completed jobs, `call`-mode jobs) are ignored.
    pub async fn handle(&self, envelope: ReplyEnvelope) {
        let correlation_id = envelope.correlation_id;
        match envelope.event {
            WorkerEvent::Progress { index, mut result } => {
                let (total, hide_output) = {
                    let mut jobs = self.jobs.lock().await;
                    let Some(entry) = jobs.get_mut(&correlation_id) else {
                        debug!(job_id = %correlation_id, "progress for unknown job, ignoring");
                        return;
                    };
                    if entry.state == JobState::Pending {
                        debug!(job_id = %correlation_id, "first progress event, job is live");
                        entry.state = JobState::InProgress;
                    }
                    (entry.meta.total, entry.meta.hide_output)
                };
                if hide_output {
                    result.stdout.clear();
                    result.stderr.clear();
                }
                self.fan_out(
                    correlation_id,
                    OutboundEvent::Progress {
                        index,
                        result,
                        total,
                    },
                )
                .await;
            }
            WorkerEvent::Final { results, error } => {
                let Some(entry) = self.jobs.lock().await.remove(&correlation_id) else {
                    debug!(job_id = %correlation_id, "final for unknown job, ignoring");
                    return;
                };
                let event = build_final(&entry.meta, &results, error, &self.markers);
                if let OutboundEvent::Final {
                    all_passed, status, ..
                } = &event
                {
                    info!(
                        job_id = %correlation_id,
                        all_passed,
                        status = %status,
                        "Job complete"
                    );
                }
                metrics::JOBS_COMPLETED.inc();
                self.fan_out(correlation_id, event).await;
            }
        }
    }

    /// Deliver one event to every live subscriber of the id. A failed
    /// send only drops that subscriber; the rest still get the event.
    /// A final event retires the whole subscriber set.
    async fn fan_out(&self, correlation_id: Uuid, event: OutboundEvent) {
        let is_final = event.is_final();
        let mut subscribers = self.subscribers.lock().await;
        if let Some(senders) = subscribers.get_mut(&correlation_id) {
            senders.retain(|sender| {
                let delivered = sender.send(event.clone()).is_ok();
                if delivered {
                    metrics::EVENTS_FANNED_OUT.inc();
                }
                delivered
            });
            if senders.is_empty() && !is_final {
                subscribers.remove(&correlation_id);
            }
        }
        if is_final {
            subscribers.remove(&correlation_id);
        }
    }
}

/// Classify every case and aggregate the job verdict. The overall
/// status is the last case's status; `all_passed` needs every case
/// judged successful.
fn build_final(
    meta: &JobMeta,
    results: &[ExecutionResult],
    error: Option<String>,
    markers: &VerdictMarkers,
) -> OutboundEvent {
    if let Some(error) = error {
        return OutboundEvent::Final {
            problem_id: meta.problem_id.clone(),
            all_passed: false,
            status: VerdictStatus::Failure,
            results: Vec::new(),
            total: meta.total,
            error: Some(error),
        };
    }

    let mut reports = Vec::with_capacity(results.len());
    let mut all_passed = !results.is_empty();
    for (index, result) in results.iter().enumerate() {
        let expected = meta
            .expected
            .as_ref()
            .and_then(|expected| expected.get(index))
            .map(String::as_str);
        let status = classify(result, expected, markers);
        let passed = status == VerdictStatus::Success;
        all_passed = all_passed && passed;
        reports.push(CaseReport {
            id: meta
                .case_ids
                .get(index)
                .copied()
                .unwrap_or((index + 1) as u32),
            visibility: meta.visibility.get(index).copied().unwrap_or_default(),
            passed,
            status,
            expected: expected.unwrap_or("").to_string(),
            exit_code: result.exit_code,
            duration: result.duration_ms,
            memory_used: result.memory_used_kb,
            timed_out: result.timed_out,
            stdout: (!meta.hide_output).then(|| result.stdout.clone()),
            stderr: (!meta.hide_output).then(|| result.stderr.clone()),
        });
    }

    let status = reports
        .last()
        .map(|report| report.status)
        .unwrap_or(VerdictStatus::Failure);

    OutboundEvent::Final {
        problem_id: meta.problem_id.clone(),
        all_passed,
        status,
        results: reports,
        total: meta.total,
        error: None,
    }
}

/// Drive the distributor from the RPC client's reply stream until the
/// broker connection goes away.
pub async fn run(
    distributor: Arc<Distributor>,
    mut replies: mpsc::UnboundedReceiver<ReplyEnvelope>,
) {
    while let Some(envelope) = replies.recv().await {
        distributor.handle(envelope).await;
    }
    info!("Reply stream closed, distributor stopping");
}
