use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::{handlers, metrics, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execute", post(handlers::execute))
        .route("/submissions", post(handlers::submit))
        .route("/judge", post(handlers::judge))
        .route("/ws/progress/:id", get(handlers::progress_ws))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(metrics::serve_metrics))
}
