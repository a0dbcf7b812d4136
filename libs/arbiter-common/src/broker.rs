use redis::{AsyncCommands, RedisResult};
use uuid::Uuid;

use crate::protocol::{JobRequest, ReplyEnvelope};

/// Redis queue semantics - defines only semantics, not runtime logic.
/// Keys are deterministic so the API, the workers, and the CLI never
/// drift on naming.
///
/// Jobs travel through one shared list (`arbiter:queue:execute`). A
/// worker claims a job with BLMOVE into its own processing list and
/// removes it only after the final event is published, so a worker that
/// dies mid-job leaves the payload behind for requeueing. Replies go
/// over pub/sub channels owned by the dispatching process.

pub const SUBMIT_QUEUE: &str = "arbiter:queue:execute";
pub const PROCESSING_PREFIX: &str = "arbiter:processing";
pub const REPLY_PREFIX: &str = "arbiter:reply";

/// Processing list holding the jobs a worker has claimed but not yet
/// acknowledged.
pub fn processing_key(worker_id: &str) -> String {
    format!("{}:{}", PROCESSING_PREFIX, worker_id)
}

/// Reply channel owned by one front-end process.
pub fn reply_channel(client_id: &Uuid) -> String {
    format!("{}:{}", REPLY_PREFIX, client_id)
}

fn encode_err(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "serialization error",
        e.to_string(),
    ))
}

/// Push a job onto the shared submit queue. RPUSH keeps FIFO order with
/// the LEFT-side claim below.
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &JobRequest,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(encode_err)?;
    conn.rpush(SUBMIT_QUEUE, payload).await
}

/// Claim one job, blocking up to `timeout_seconds`. The raw payload is
/// returned so the caller can acknowledge exactly what it claimed.
pub async fn claim_job(
    conn: &mut redis::aio::ConnectionManager,
    worker_id: &str,
    timeout_seconds: f64,
) -> RedisResult<Option<String>> {
    redis::cmd("BLMOVE")
        .arg(SUBMIT_QUEUE)
        .arg(processing_key(worker_id))
        .arg("LEFT")
        .arg("LEFT")
        .arg(timeout_seconds)
        .query_async(conn)
        .await
}

/// Acknowledge a claimed job by removing its payload from the worker's
/// processing list.
pub async fn ack_job(
    conn: &mut redis::aio::ConnectionManager,
    worker_id: &str,
    payload: &str,
) -> RedisResult<()> {
    let _removed: i64 = conn.lrem(processing_key(worker_id), 1, payload).await?;
    Ok(())
}

/// Move any payloads left in this worker's processing list back onto
/// the submit queue. Called on boot so a crashed run is redelivered;
/// batches keep no partial state, so re-running from scratch is safe.
pub async fn requeue_orphans(
    conn: &mut redis::aio::ConnectionManager,
    worker_id: &str,
) -> RedisResult<usize> {
    let key = processing_key(worker_id);
    let orphans: Vec<String> = conn.lrange(&key, 0, -1).await?;
    for payload in &orphans {
        let _: () = conn.rpush(SUBMIT_QUEUE, payload).await?;
    }
    if !orphans.is_empty() {
        let _: () = conn.del(&key).await?;
    }
    Ok(orphans.len())
}

/// Publish one reply envelope onto a job's reply channel.
pub async fn publish_reply(
    conn: &mut redis::aio::ConnectionManager,
    reply_to: &str,
    envelope: &ReplyEnvelope,
) -> RedisResult<()> {
    let payload = serde_json::to_string(envelope).map_err(encode_err)?;
    conn.publish(reply_to, payload).await
}
