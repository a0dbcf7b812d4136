//! Wire types for the broker protocol: what the front end enqueues, what
//! the worker publishes back, and what the distributor fans out to
//! subscribed transport channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::problems::Visibility;
use crate::types::{ExecutionResult, Submission};
use crate::verdict::VerdictStatus;

/// One dispatched batch-execution request, tracked end to end by its
/// correlation id. This is the payload pushed onto the submit queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub correlation_id: Uuid,
    /// Reply channel of the dispatching process; every progress and
    /// final event for this job is published there.
    pub reply_to: String,
    pub created_at: DateTime<Utc>,
    pub submission: Submission,
    pub meta: JobMeta,
}

/// Judging metadata carried alongside the submission. The worker only
/// needs `expected` and `early_stop`; the rest is read back by the
/// distributor when events arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<String>>,
    /// Per-case visibility tags, parallel to the stdin list.
    #[serde(default)]
    pub visibility: Vec<Visibility>,
    /// Per-case ids, parallel to the stdin list.
    #[serde(default)]
    pub case_ids: Vec<u32>,
    pub total: usize,
    #[serde(default)]
    pub hide_output: bool,
    #[serde(default)]
    pub early_stop: bool,
}

impl JobMeta {
    /// Metadata for an ad-hoc submission: sequential case ids, all
    /// cases public, nothing hidden.
    pub fn ad_hoc(total: usize, expected: Option<Vec<String>>, early_stop: bool) -> Self {
        JobMeta {
            problem_id: None,
            expected,
            visibility: vec![Visibility::Public; total],
            case_ids: (1..=total as u32).collect(),
            total,
            hide_output: false,
            early_stop,
        }
    }
}

/// Event published by a worker onto a job's reply channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Progress {
        index: usize,
        result: ExecutionResult,
    },
    Final {
        #[serde(default)]
        results: Vec<ExecutionResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WorkerEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, WorkerEvent::Final { .. })
    }
}

/// Envelope pairing a worker event with the job it belongs to. This is
/// the unit that travels over the reply channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub correlation_id: Uuid,
    pub event: WorkerEvent,
}

/// One judged case inside the final report. `stdout`/`stderr` are absent
/// when the job hides output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReport {
    pub id: u32,
    pub visibility: Visibility,
    pub passed: bool,
    pub status: VerdictStatus,
    pub expected: String,
    pub exit_code: i32,
    pub duration: u64,
    pub memory_used: u64,
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Classified event delivered to live subscribers of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Progress {
        index: usize,
        result: ExecutionResult,
        total: usize,
    },
    #[serde(rename_all = "camelCase")]
    Final {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        problem_id: Option<String>,
        all_passed: bool,
        status: VerdictStatus,
        results: Vec<CaseReport>,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutboundEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, OutboundEvent::Final { .. })
    }
}
