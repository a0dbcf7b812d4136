// HTTP and WebSocket route handlers for the Arbiter API

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use arbiter_common::problems::ProblemStoreError;
use arbiter_common::protocol::{JobMeta, WorkerEvent};
use arbiter_common::types::{
    default_memory_limit_mb, default_time_limit_ms, Language, Submission,
};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub language: Language,
    pub code: String,
    #[serde(default)]
    pub stdin: String,
    #[serde(default = "default_time_limit_ms")]
    pub time_limit: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit: u64,
    #[serde(default)]
    pub token: Option<String>,
}

/// POST /execute - run one stdin and block until the verdict is in.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteRequest>,
) -> Response {
    let submission = Submission {
        language: payload.language,
        code: payload.code,
        stdins: vec![payload.stdin],
        time_limit_ms: payload.time_limit,
        wall_time_limit_ms: None,
        memory_limit_mb: payload.memory_limit,
        token: payload.token,
    };
    metrics::JOBS_DISPATCHED.inc();

    match state.rpc.call(submission, JobMeta::ad_hoc(1, None, false)).await {
        Ok(WorkerEvent::Final {
            error: Some(error), ..
        }) => {
            warn!(error = %error, "Blocking execution failed");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": error })),
            )
                .into_response()
        }
        Ok(WorkerEvent::Final { results, .. }) => match results.into_iter().next() {
            Some(result) => (StatusCode::OK, Json(result)).into_response(),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "worker returned no result" })),
            )
                .into_response(),
        },
        Ok(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "unexpected reply from worker" })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Broker call failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub language: Language,
    pub code: String,
    #[serde(default)]
    pub stdins: Vec<String>,
    #[serde(default = "default_time_limit_ms")]
    pub time_limit: u64,
    #[serde(default)]
    pub wall_time_limit: Option<u64>,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit: u64,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expected: Option<Vec<String>>,
    #[serde(default)]
    pub early_stop: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub request_id: String,
}

/// POST /submissions - dispatch a batch and return the correlation id
/// immediately; progress arrives on the WebSocket stream.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let stdins = if payload.stdins.is_empty() {
        vec![String::new()]
    } else {
        payload.stdins
    };
    let total = stdins.len();
    let meta = JobMeta::ad_hoc(total, payload.expected, payload.early_stop);
    let submission = Submission {
        language: payload.language,
        code: payload.code,
        stdins,
        time_limit_ms: payload.time_limit,
        wall_time_limit_ms: payload.wall_time_limit,
        memory_limit_mb: payload.memory_limit,
        token: payload.token,
    };

    dispatch(&state, submission, meta).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub language: Language,
    pub code: String,
    pub problem_id: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// POST /judge - judge a submission against a stored problem
/// definition.
pub async fn judge(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<JudgeRequest>,
) -> Response {
    let problem = match state.problems.get(&payload.problem_id).await {
        Ok(Some(problem)) => problem,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "unknown problem" })),
            )
                .into_response()
        }
        Err(ProblemStoreError::InvalidId(id)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("invalid problem id: {}", id) })),
            )
                .into_response()
        }
        Err(e) => {
            error!(problem_id = %payload.problem_id, error = %e, "Problem lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "problem lookup failed" })),
            )
                .into_response();
        }
    };

    if !problem.allows(payload.language) {
        // distinct not-implemented condition, not an ordinary failure
        return (
            StatusCode::NOT_IMPLEMENTED,
            Json(serde_json::json!({
                "error": format!("language '{}' is not accepted for this problem", payload.language)
            })),
        )
            .into_response();
    }

    let total = problem.test_cases.len();
    let meta = JobMeta {
        problem_id: Some(problem.id.clone()),
        expected: Some(problem.test_cases.iter().map(|c| c.output.clone()).collect()),
        visibility: problem.test_cases.iter().map(|c| c.visibility).collect(),
        case_ids: problem.test_cases.iter().map(|c| c.id).collect(),
        total,
        hide_output: problem.hide_output,
        early_stop: false,
    };
    let submission = Submission {
        language: payload.language,
        code: payload.code,
        stdins: problem.test_cases.iter().map(|c| c.input.clone()).collect(),
        time_limit_ms: problem.time_limit_ms,
        wall_time_limit_ms: problem.wall_time_limit_ms,
        memory_limit_mb: problem.memory_limit_kb / 1024,
        token: payload.token,
    };

    dispatch(&state, submission, meta).await
}

/// Register with the distributor first, then push to the broker, so no
/// event can arrive for an id the distributor has never seen.
async fn dispatch(state: &AppState, submission: Submission, meta: JobMeta) -> Response {
    let correlation_id = Uuid::new_v4();
    state.distributor.register(correlation_id, meta.clone()).await;

    match state.rpc.send_with_id(correlation_id, submission, meta).await {
        Ok(()) => {
            metrics::JOBS_DISPATCHED.inc();
            info!(job_id = %correlation_id, "Job queued");
            (
                StatusCode::CREATED,
                Json(SubmitResponse {
                    request_id: correlation_id.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(job_id = %correlation_id, error = %e, "Failed to queue job");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /ws/progress/:id - live event stream for one job.
pub async fn progress_ws(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let correlation_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "invalid request id").into_response();
        }
    };
    ws.on_upgrade(move |socket| stream_progress(socket, state, correlation_id))
        .into_response()
}

async fn stream_progress(mut socket: WebSocket, state: Arc<AppState>, correlation_id: Uuid) {
    let mut events = state.distributor.subscribe(correlation_id).await;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "Failed to encode outbound event");
                        break;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    // disconnected subscriber; the job runs on regardless
                    break;
                }
                if event.is_final() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    let _ = socket.close().await;
}

/// GET /health - liveness probe.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
