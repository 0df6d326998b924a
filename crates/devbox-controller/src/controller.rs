use crate::config::ControllerConfig;
use crate::error::Result;
use crate::events::EventRecorder;
use crate::lock::LockTable;
use crate::matcher::{default_matchers, PodMatcher};
use crate::phase::derive_phase;
use crate::retry::retry_on_conflict;
use crate::runner::{Action, Reconciler};
use crate::sync::{remove_all, sync_pod, sync_secret, sync_service};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use devbox_core::{
    Devbox, DevboxAction, DevboxPhase, NetworkType, ObjectKey, Resource, FINALIZER_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Primary reconciler: keeps one Pod, one Service and one Secret in line
/// with each Devbox and walks it through its deletion lifecycle.
pub struct DevboxReconciler {
    client: Arc<dyn ClusterClient>,
    config: ControllerConfig,
    locks: LockTable,
    matchers: Vec<Box<dyn PodMatcher>>,
    recorder: EventRecorder,
}

impl DevboxReconciler {
    pub fn new(client: Arc<dyn ClusterClient>, config: ControllerConfig) -> Self {
        let recorder = EventRecorder::new(Arc::clone(&client), "devbox-controller");
        Self {
            client,
            config,
            locks: LockTable::new(),
            matchers: default_matchers(),
            recorder,
        }
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// One reconcile pass for the Devbox at `key`
    pub async fn reconcile_devbox(&self, key: &ObjectKey) -> Result<Action> {
        let Some(_guard) = self.locks.try_acquire(key) else {
            debug!(devbox = %key, "Reconcile already in flight, retrying later");
            return Ok(Action::requeue(self.config.lock_retry_delay));
        };

        let devbox = match self.client.get_devbox(&key.namespace, &key.name).await {
            Ok(devbox) => devbox,
            Err(e) if e.is_not_found() => {
                debug!(devbox = %key, "Devbox not found");
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e),
        };

        if !devbox.is_deleting() {
            let devbox = self.ensure_finalizer(devbox).await?;
            return self.sync(devbox).await;
        }

        if devbox.status.phase == DevboxPhase::Stopped {
            return self.finalize(&devbox).await;
        }

        if devbox.spec.action != DevboxAction::Shutdown {
            return self.request_shutdown(devbox).await;
        }

        // Deleting with Shutdown already requested: keep driving toward Stopped
        self.sync(devbox).await
    }

    async fn ensure_finalizer(&self, devbox: Devbox) -> Result<Devbox> {
        if devbox.has_finalizer(FINALIZER_NAME) {
            return Ok(devbox);
        }

        let client = self.client.as_ref();
        let (namespace, name) = (devbox.namespace(), devbox.name());
        let updated = retry_on_conflict("add devbox finalizer", || async move {
            let mut latest = client.get_devbox(namespace, name).await?;
            if latest.add_finalizer(FINALIZER_NAME) {
                client.update_devbox(&latest).await
            } else {
                Ok(latest)
            }
        })
        .await?;

        info!(devbox = %updated.key(), "Added finalizer");
        Ok(updated)
    }

    async fn request_shutdown(&self, mut devbox: Devbox) -> Result<Action> {
        info!(devbox = %devbox.key(), phase = %devbox.status.phase, "Devbox deleting, requesting shutdown");
        devbox.spec.action = DevboxAction::Shutdown;

        if let Err(e) = self.client.update_devbox(&devbox).await {
            self.recorder
                .warning(&devbox, "Failed", format!("Failed to request shutdown: {}", e))
                .await;
            return Err(e);
        }
        Ok(Action::await_change())
    }

    /// Deleting and Stopped: remove every child, then release the Devbox
    async fn finalize(&self, devbox: &Devbox) -> Result<Action> {
        if let Err(e) = remove_all(self.client.as_ref(), devbox).await {
            self.recorder
                .warning(devbox, "Failed", format!("Failed to remove resources: {}", e))
                .await;
            return Err(e);
        }

        let client = self.client.as_ref();
        let (namespace, name) = (devbox.namespace(), devbox.name());
        let released = retry_on_conflict("remove devbox finalizer", || async move {
            let mut latest = client.get_devbox(namespace, name).await?;
            if latest.remove_finalizer(FINALIZER_NAME) {
                client.update_devbox(&latest).await.map(|_| ())
            } else {
                Ok(())
            }
        })
        .await;

        match released {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(devbox = %devbox.key(), "Devbox finalized");
        Ok(Action::await_change())
    }

    async fn sync(&self, mut devbox: Devbox) -> Result<Action> {
        let observed = devbox.status.clone();
        let consumed = devbox.spec.action;

        devbox.status.network.network_type = devbox.spec.network.network_type;

        let derived = derive_phase(devbox.spec.action, devbox.status.phase);
        if let Some(next) = derived {
            info!(
                devbox = %devbox.key(),
                action = %devbox.spec.action,
                from = %devbox.status.phase,
                to = %next,
                "Applying action"
            );
            devbox.status.phase = next;
        }

        if let Err(e) = sync_secret(self.client.as_ref(), &devbox).await {
            self.recorder
                .warning(&devbox, "Failed", format!("Failed to sync secret: {}", e))
                .await;
            return Err(e);
        }

        if devbox.spec.network.network_type == NetworkType::NodePort {
            if let Err(e) = sync_service(self.client.as_ref(), &mut devbox).await {
                self.recorder
                    .warning(&devbox, "Failed", format!("Failed to sync service: {}", e))
                    .await;
                return Err(e);
            }
        }

        let outcome = match sync_pod(
            self.client.as_ref(),
            &self.config,
            &self.matchers,
            &mut devbox,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.recorder
                    .warning(&devbox, "Failed", format!("Failed to sync pod: {}", e))
                    .await;
                return Err(e);
            }
        };

        if let Some(message) = &outcome.changed {
            self.recorder.normal(&devbox, "SyncPod", message.clone()).await;
        }

        if let Some(message) = &outcome.quota_exceeded {
            self.recorder
                .warning(&devbox, "ExceededQuota", message.clone())
                .await;
        }

        if let Some(next) = outcome.next_phase {
            info!(devbox = %devbox.key(), from = %devbox.status.phase, to = %next, "Phase advanced");
            devbox.status.phase = next;
        }

        if devbox.status != observed {
            let from = observed.phase;
            devbox = self.persist_status(&devbox).await?;
            if devbox.status.phase != from {
                self.recorder
                    .normal(
                        &devbox,
                        "PhaseChanged",
                        format!("Phase changed from {} to {}", from, devbox.status.phase),
                    )
                    .await;
            }
        }

        if derived.is_some() && !devbox.is_deleting() {
            self.reset_action(&devbox, consumed).await?;
        }

        let requeue = match outcome.requeue_after {
            Some(delay) => Some(delay),
            None if outcome.next_phase.is_some() => Some(Duration::ZERO),
            None => None,
        };
        Ok(requeue.map_or_else(Action::await_change, Action::requeue))
    }

    /// Write the computed status against the resourceVersion this pass read.
    ///
    /// A conflict means someone else wrote in the meantime; the pass fails and
    /// the runner retries it from fresh state.
    async fn persist_status(&self, devbox: &Devbox) -> Result<Devbox> {
        match self.client.update_devbox_status(devbox).await {
            Ok(updated) => {
                debug!(devbox = %updated.key(), phase = %updated.status.phase, "Status persisted");
                Ok(updated)
            }
            Err(e) => {
                warn!(devbox = %devbox.key(), error = %e, "Failed to update status");
                self.recorder
                    .warning(devbox, "Failed", format!("Failed to update status: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    /// Clear the consumed action unless the user already asked for another one
    async fn reset_action(&self, devbox: &Devbox, consumed: DevboxAction) -> Result<()> {
        let client = self.client.as_ref();
        let (namespace, name) = (devbox.namespace(), devbox.name());

        let reset = retry_on_conflict("reset devbox action", || async move {
            let mut latest = client.get_devbox(namespace, name).await?;
            if latest.spec.action != consumed {
                return Ok(());
            }
            latest.spec.action = DevboxAction::None;
            client.update_devbox(&latest).await.map(|_| ())
        })
        .await;

        if let Err(e) = reset {
            warn!(devbox = %devbox.key(), error = %e, "Failed to reset action");
            self.recorder
                .warning(devbox, "Failed", format!("Failed to reset action: {}", e))
                .await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for DevboxReconciler {
    fn name(&self) -> &str {
        "devbox"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        self.reconcile_devbox(key).await
    }

    fn evict_idle(&self, ttl: Duration) -> usize {
        self.locks.evict_idle(ttl)
    }
}
