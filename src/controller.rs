use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::kubernetes::{enqueue_event, PodEventStream};
use crate::mute::MuteCache;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::types::{Config, PodIdentity};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub worker_count: usize,
    pub max_retries: u32,
    pub sweep_interval: Duration,
    /// Mute entries older than this are swept.
    pub mute_retention: chrono::Duration,
}

impl ControllerSettings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mute_retention = chrono::Duration::try_seconds(cfg.mute_seconds)
            .and_then(|window| window.checked_mul(cfg.mute_retention_factor))
            .context("Invalid mute retention: MUTE_SECONDS times MUTE_RETENTION_FACTOR is out of range")?;
        Ok(Self {
            worker_count: cfg.worker_count,
            max_retries: cfg.max_retries,
            sweep_interval: Duration::from_secs(cfg.mute_sweep_seconds),
            mute_retention,
        })
    }
}

/// Ties event ingestion, the work queue and the reconciliation workers together.
pub struct Controller {
    queue: Arc<WorkQueue<PodIdentity>>,
    reconciler: Arc<Reconciler>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        queue: Arc<WorkQueue<PodIdentity>>,
        reconciler: Arc<Reconciler>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            queue,
            reconciler,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<PodIdentity>> {
        &self.queue
    }

    /// Runs until [`Controller::shutdown`]. In-flight reconciliations finish
    /// before this returns; the watch stream is dropped afterwards.
    pub async fn run(self: Arc<Self>, events: PodEventStream) -> Result<()> {
        info!("starting controller with {} workers", self.settings.worker_count);

        let ingest = tokio::spawn(ingest_events(Arc::clone(&self.queue), events));
        let sweeper = tokio::spawn(run_mute_sweeper(
            Arc::clone(&self.queue),
            Arc::clone(self.reconciler.mute_cache()),
            self.settings.sweep_interval,
            self.settings.mute_retention,
        ));

        let workers: Vec<_> = (0..self.settings.worker_count.max(1))
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.reconciler),
                    self.settings.max_retries,
                ))
            })
            .collect();

        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("reconcile worker panicked: {}", e);
            }
        }
        ingest.abort();
        if let Err(e) = sweeper.await {
            error!("mute sweeper panicked: {}", e);
        }

        info!("controller stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("shutting down controller");
        self.queue.shutdown();
    }
}

async fn ingest_events(queue: Arc<WorkQueue<PodIdentity>>, mut events: PodEventStream) {
    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                enqueue_event(&queue, event);
            }
            Err(e) => warn!("pod watch error: {}", e),
        }
    }
    warn!("pod watch stream ended");
}

/// Pulls keys until the queue shuts down. Transient failures are retried with
/// backoff up to `max_retries`, then dropped with an error log.
pub async fn run_worker(
    id: usize,
    queue: Arc<WorkQueue<PodIdentity>>,
    reconciler: Arc<Reconciler>,
    max_retries: u32,
) {
    while let Some(key) = queue.dequeue().await {
        match reconciler.reconcile(&key, Utc::now()).await {
            Ok(_) => queue.forget(&key),
            Err(e) if e.is_transient() && queue.num_requeues(&key) < max_retries => {
                warn!("worker {}: retrying {}: {}", id, key, e);
                queue.enqueue_rate_limited(key.clone());
            }
            Err(e) => {
                error!("worker {}: giving up on {}: {}", id, key, e);
                queue.forget(&key);
            }
        }
        queue.done(&key);
    }
}

pub async fn run_mute_sweeper(
    queue: Arc<WorkQueue<PodIdentity>>,
    mute: Arc<MuteCache>,
    interval: Duration,
    retention: chrono::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                mute.sweep(Utc::now(), retention);
            }
            _ = queue.closed() => break,
        }
    }
}
