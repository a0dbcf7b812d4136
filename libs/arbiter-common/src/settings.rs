//! Process settings, environment-variable driven.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    /// API bind address.
    pub bind_addr: String,
    /// Directory holding `<problem_id>.json` definitions.
    pub problem_dir: PathBuf,
    /// Stable worker identity; names the processing list used for
    /// crash-requeue, so keep it unique per worker instance.
    pub worker_id: String,
    /// Memory sampler poll interval.
    pub sample_interval_ms: u64,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: std::env::var("ARBITER_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            problem_dir: std::env::var("ARBITER_PROBLEM_DIR")
                .unwrap_or_else(|_| "problems".to_string())
                .into(),
            worker_id: std::env::var("ARBITER_WORKER_ID")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "worker-1".to_string()),
            sample_interval_ms: std::env::var("ARBITER_SAMPLE_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
        }
    }
}
