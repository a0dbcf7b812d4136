// Process-level counters exposed at /metrics.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

lazy_static! {
    pub static ref JOBS_DISPATCHED: IntCounter = register_int_counter!(
        "arbiter_jobs_dispatched_total",
        "Jobs pushed onto the broker queue"
    )
    .expect("register arbiter_jobs_dispatched_total");
    pub static ref JOBS_COMPLETED: IntCounter = register_int_counter!(
        "arbiter_jobs_completed_total",
        "Final events processed by the distributor"
    )
    .expect("register arbiter_jobs_completed_total");
    pub static ref EVENTS_FANNED_OUT: IntCounter = register_int_counter!(
        "arbiter_events_fanned_out_total",
        "Events delivered to live subscribers"
    )
    .expect("register arbiter_events_fanned_out_total");
}

pub async fn serve_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            String::from_utf8_lossy(&buffer).into_owned(),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {}", e),
        ),
    }
}
