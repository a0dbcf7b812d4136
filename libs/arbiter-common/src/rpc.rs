//! Correlation-id RPC over the shared broker.
//!
//! One [`RpcClient`] per process. `call` blocks on a future resolved
//! when the matching final reply arrives; `send` returns the assigned
//! correlation id immediately, and outcomes are observed through the
//! reply stream handed out by [`RpcClient::connect`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker;
use crate::protocol::{JobMeta, JobRequest, ReplyEnvelope, WorkerEvent};
use crate::settings::Settings;
use crate::types::Submission;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),
    /// The reply listener died (broker connection lost) before the
    /// matching final event arrived.
    #[error("reply listener is gone, call abandoned")]
    ListenerGone,
}

type PendingTable = Arc<Mutex<HashMap<Uuid, oneshot::Sender<WorkerEvent>>>>;

pub struct RpcClient {
    conn: ConnectionManager,
    reply_channel: String,
    pending: PendingTable,
}

impl RpcClient {
    /// Open the command connection plus the pub/sub subscription on a
    /// fresh process-unique reply channel. The returned receiver yields
    /// every reply envelope (progress and final) seen on that channel;
    /// the distributor consumes it. Dropping the receiver is fine for
    /// callers that only ever use `call`.
    pub async fn connect(
        settings: &Settings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ReplyEnvelope>), RpcError> {
        let client = redis::Client::open(settings.redis_url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;

        let reply_channel = broker::reply_channel(&Uuid::new_v4());
        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(&reply_channel).await?;
        debug!(channel = %reply_channel, "subscribed to reply channel");

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        tokio::spawn(listen(pubsub, Arc::clone(&pending), reply_tx));

        Ok((
            RpcClient {
                conn,
                reply_channel,
                pending,
            },
            reply_rx,
        ))
    }

    /// The reply channel jobs dispatched by this client carry.
    pub fn reply_channel(&self) -> &str {
        &self.reply_channel
    }

    fn build_job(&self, correlation_id: Uuid, submission: Submission, meta: JobMeta) -> JobRequest {
        JobRequest {
            correlation_id,
            reply_to: self.reply_channel.clone(),
            created_at: Utc::now(),
            submission,
            meta,
        }
    }

    /// Dispatch a job and block until its final event arrives.
    pub async fn call(
        &self,
        submission: Submission,
        meta: JobMeta,
    ) -> Result<WorkerEvent, RpcError> {
        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(correlation_id, tx);

        let job = self.build_job(correlation_id, submission, meta);
        let mut conn = self.conn.clone();
        if let Err(e) = broker::push_job(&mut conn, &job).await {
            self.pending.lock().await.remove(&correlation_id);
            return Err(e.into());
        }

        match rx.await {
            Ok(event) => Ok(event),
            Err(_) => Err(RpcError::ListenerGone),
        }
    }

    /// Dispatch a job and return its correlation id immediately. The
    /// caller watches the reply stream for progress under that id.
    pub async fn send(&self, submission: Submission, meta: JobMeta) -> Result<Uuid, RpcError> {
        let correlation_id = Uuid::new_v4();
        self.send_with_id(correlation_id, submission, meta).await?;
        Ok(correlation_id)
    }

    /// Dispatch under a caller-chosen correlation id, for callers that
    /// must register the id elsewhere (the distributor's job table)
    /// before the first event can possibly arrive.
    pub async fn send_with_id(
        &self,
        correlation_id: Uuid,
        submission: Submission,
        meta: JobMeta,
    ) -> Result<(), RpcError> {
        let job = self.build_job(correlation_id, submission, meta);
        let mut conn = self.conn.clone();
        broker::push_job(&mut conn, &job).await?;
        Ok(())
    }
}

/// Reply-channel listener. Resolves pending `call` futures on final
/// events; every envelope is also forwarded to the reply stream, where
/// unknown correlation ids are the distributor's problem to ignore.
async fn listen(
    mut pubsub: redis::aio::PubSub,
    pending: PendingTable,
    reply_tx: mpsc::UnboundedSender<ReplyEnvelope>,
) {
    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "unreadable reply payload, skipping");
                continue;
            }
        };
        let envelope: ReplyEnvelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "malformed reply envelope, skipping");
                continue;
            }
        };

        if envelope.event.is_final() {
            if let Some(waiter) = pending.lock().await.remove(&envelope.correlation_id) {
                let _ = waiter.send(envelope.event.clone());
            }
        }
        // Receiver may be long gone (call-only clients); that just
        // means nobody watches the progress stream.
        let _ = reply_tx.send(envelope);
    }
    warn!("reply subscription closed; pending calls will error");
    pending.lock().await.clear();
}
