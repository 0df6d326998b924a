//! Drives a [`Reconciler`] from a polled view of the Devbox list.
//!
//! The watcher lists Devboxes every poll interval and enqueues keys whose
//! resourceVersion changed. First-seen objects pass through the restart
//! window filter. Every key seen is re-enqueued on resync. Workers are
//! bounded by a semaphore; failed passes back off exponentially per key.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::filter::RestartWindowFilter;
use crate::queue::WorkQueue;
use crate::traits::ClusterClient;
use async_trait::async_trait;
use devbox_core::ObjectKey;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const FAILURE_BACKOFF_BASE: Duration = Duration::from_secs(1);
const FAILURE_BACKOFF_MAX: Duration = Duration::from_secs(300);

/// What to do with a key after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Run again after `delay` even without a change
    pub fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }

    /// Wait for the next observed change or resync
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// One pass for `key`. An error requeues the key with backoff.
    async fn reconcile(&self, key: &ObjectKey) -> Result<Action>;

    /// Drop bookkeeping idle for longer than `ttl`; returns how much was dropped
    fn evict_idle(&self, _ttl: Duration) -> usize {
        0
    }
}

/// `1s, 2s, 4s, ...` capped at five minutes
pub fn failure_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    FAILURE_BACKOFF_BASE
        .saturating_mul(1u32 << exponent)
        .min(FAILURE_BACKOFF_MAX)
}

pub struct Runner {
    reconciler: Arc<dyn Reconciler>,
    client: Arc<dyn ClusterClient>,
    config: ControllerConfig,
    queue: Arc<WorkQueue>,
    failures: Arc<Mutex<HashMap<ObjectKey, u32>>>,
}

impl Runner {
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        client: Arc<dyn ClusterClient>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            reconciler,
            client,
            config,
            queue: WorkQueue::new(),
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until `token` is cancelled. In-flight passes are left to finish.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            reconciler = self.reconciler.name(),
            workers = self.config.max_concurrent_reconciles,
            "Starting reconciler"
        );

        let filter = RestartWindowFilter::new(self.config.restart_predicate_window);
        let workers = Arc::new(Semaphore::new(self.config.max_concurrent_reconciles.max(1)));
        let mut seen: HashMap<ObjectKey, String> = HashMap::new();

        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut resync = tokio::time::interval(self.config.resync_interval);
        // The first poll already enqueues everything admitted
        resync.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(reconciler = self.reconciler.name(), "Reconciler shutting down");
                    return Ok(());
                }
                _ = poll.tick() => {
                    if let Err(e) = self.watch(&filter, &mut seen).await {
                        error!(reconciler = self.reconciler.name(), error = %e, "Failed to list devboxes");
                    }
                }
                _ = resync.tick() => {
                    for key in seen.keys() {
                        self.queue.add(key.clone());
                    }
                    let evicted = self.reconciler.evict_idle(self.config.idle_lock_ttl);
                    debug!(reconciler = self.reconciler.name(), keys = seen.len(), evicted, "Resync");
                }
                next = next_work(&workers, &self.queue) => {
                    let (permit, key) = next?;
                    let reconciler = Arc::clone(&self.reconciler);
                    let queue = Arc::clone(&self.queue);
                    let failures = Arc::clone(&self.failures);
                    tokio::spawn(async move {
                        process(reconciler.as_ref(), &queue, &failures, key).await;
                        drop(permit);
                    });
                }
            }
        }
    }

    /// One poll of the Devbox list
    async fn watch(
        &self,
        filter: &RestartWindowFilter,
        seen: &mut HashMap<ObjectKey, String>,
    ) -> Result<()> {
        let devboxes = self.client.list_devboxes().await?;
        let mut present = HashSet::with_capacity(devboxes.len());

        for devbox in devboxes {
            let key = devbox.key();
            let version = devbox.metadata.resource_version.clone().unwrap_or_default();
            present.insert(key.clone());

            match seen.insert(key.clone(), version.clone()) {
                None if filter.admits_create(devbox.metadata.creation_timestamp.as_ref()) => {
                    self.queue.add(key);
                }
                None => {
                    debug!(devbox = %key, "Skipping create of pre-existing devbox");
                }
                Some(previous) if previous != version => self.queue.add(key),
                Some(_) => {}
            }
        }

        seen.retain(|key, _| present.contains(key));
        self.failures.lock().retain(|key, _| present.contains(key));
        Ok(())
    }
}

/// Wait for a free worker, then for a key to hand it
async fn next_work(
    workers: &Arc<Semaphore>,
    queue: &WorkQueue,
) -> Result<(OwnedSemaphorePermit, ObjectKey)> {
    let permit = Arc::clone(workers)
        .acquire_owned()
        .await
        .map_err(|e| ControllerError::internal_error(format!("worker pool closed: {}", e)))?;
    Ok((permit, queue.pop().await))
}

async fn process(
    reconciler: &dyn Reconciler,
    queue: &Arc<WorkQueue>,
    failures: &Mutex<HashMap<ObjectKey, u32>>,
    key: ObjectKey,
) {
    match reconciler.reconcile(&key).await {
        Ok(action) => {
            failures.lock().remove(&key);
            if let Some(delay) = action.requeue_after() {
                queue.add_after(key, delay);
            }
        }
        Err(e) => {
            let attempts = {
                let mut failures = failures.lock();
                let count = failures.entry(key.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let delay = failure_backoff(attempts);
            error!(
                reconciler = reconciler.name(),
                devbox = %key,
                attempts,
                retry_in = ?delay,
                error = %e,
                "Reconcile failed"
            );
            queue.add_after(key, delay);
        }
    }
}
