//! Bounded webhook work queue.
//!
//! The HTTP handler only validates and enqueues; a fixed pool of workers
//! drives the orchestrator. Events are sharded by room so a room's events are
//! handled in arrival order, while different rooms proceed in parallel.

use super::auto_record::AutoRecordOrchestrator;
use crate::error::{AppError, AppResult};
use crate::models::WebhookEvent;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub type WebhookSender = mpsc::Sender<WebhookEvent>;

pub struct WebhookDispatcher {
    shards: parking_lot::RwLock<Vec<WebhookSender>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Room an event belongs to, used for shard selection.
fn routing_key(event: &WebhookEvent) -> &str {
    match event {
        WebhookEvent::RoomStarted { room }
        | WebhookEvent::RoomFinished { room }
        | WebhookEvent::ParticipantJoined { room, .. }
        | WebhookEvent::ParticipantLeft { room, .. }
        | WebhookEvent::TrackPublished { room, .. }
        | WebhookEvent::TrackUnpublished { room, .. }
        | WebhookEvent::TrackSubscribed { room, .. } => &room.name,
        WebhookEvent::EgressStarted { egress }
        | WebhookEvent::EgressUpdated { egress }
        | WebhookEvent::EgressEnded { egress } => &egress.room_name,
        WebhookEvent::Other { event } => event,
    }
}

fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

impl WebhookDispatcher {
    /// Spawns `workers` tasks sharing `capacity` queued events between them.
    pub fn spawn(orchestrator: Arc<AutoRecordOrchestrator>, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let per_shard = capacity.div_ceil(workers).max(1);

        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = mpsc::channel(per_shard);
            shards.push(tx);
            handles.push(Self::spawn_worker(worker, orchestrator.clone(), rx));
        }

        tracing::info!(workers, per_shard, "webhook workers started");
        Self {
            shards: parking_lot::RwLock::new(shards),
            workers: Mutex::new(handles),
        }
    }

    fn spawn_worker(
        worker: usize,
        orchestrator: Arc<AutoRecordOrchestrator>,
        mut receiver: mpsc::Receiver<WebhookEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let name = event.name().to_string();
                if let Err(e) = orchestrator.handle_event(event).await {
                    tracing::error!(
                        worker,
                        event = %name,
                        error = %e,
                        retryable = e.is_retryable(),
                        "webhook processing failed"
                    );
                }
            }
            tracing::debug!(worker, "webhook worker stopped (channel closed)");
        })
    }

    /// Enqueues without waiting. A full shard is reported as back-pressure.
    pub fn submit(&self, event: WebhookEvent) -> AppResult<()> {
        let shards = self.shards.read();
        if shards.is_empty() {
            return Err(AppError::ServiceUnavailable("webhook workers are shut down".into()));
        }
        let shard = shard_for(routing_key(&event), shards.len());
        match shards[shard].try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                tracing::warn!(shard, event = %event.name(), "webhook queue full");
                Err(AppError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(AppError::ServiceUnavailable(
                "webhook workers are shut down".into(),
            )),
        }
    }

    /// Stops accepting events, lets workers drain what is queued, and waits for them.
    pub async fn shutdown(&self) {
        self.shards.write().clear();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "webhook worker exited abnormally");
            }
        }
        tracing::info!("webhook workers stopped");
    }
}
