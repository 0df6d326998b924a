use crate::commit::generate_image_name;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::lock::LockTable;
use crate::runner::{Action, Reconciler};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use devbox_core::{recommended_labels, DevboxPhase, ObjectKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Completes the commit hand-off for Devboxes in a committing phase.
///
/// Points `spec.image` at a fresh commit tag and moves Committing to
/// Stopped, or ShutdownCommitting to Pending, clearing the current node.
pub struct DaemonCommitter {
    client: Arc<dyn ClusterClient>,
    config: ControllerConfig,
    locks: LockTable,
}

impl DaemonCommitter {
    pub fn new(client: Arc<dyn ClusterClient>, config: ControllerConfig) -> Self {
        Self {
            client,
            config,
            locks: LockTable::new(),
        }
    }

    pub async fn reconcile_commit(&self, key: &ObjectKey) -> Result<Action> {
        let Some(_guard) = self.locks.try_acquire(key) else {
            return Ok(Action::requeue(self.config.lock_retry_delay));
        };

        let mut devbox = match self.client.get_devbox(&key.namespace, &key.name).await {
            Ok(devbox) => devbox,
            Err(e) if e.is_not_found() => return Ok(Action::await_change()),
            Err(e) => return Err(e),
        };

        let next = match devbox.status.phase {
            DevboxPhase::Committing => DevboxPhase::Stopped,
            DevboxPhase::ShutdownCommitting => DevboxPhase::Pending,
            phase => {
                debug!(devbox = %key, %phase, "Not committing");
                return Ok(Action::await_change());
            }
        };

        let pods = self
            .client
            .list_pods(&key.namespace, &recommended_labels(&key.name))
            .await?;
        if pods.len() > 1 {
            return Err(ControllerError::too_many_pods(key.to_string(), pods.len()));
        }

        devbox.spec.image = generate_image_name(&self.config.commit_image_registry, &devbox);
        let mut devbox = self.client.update_devbox(&devbox).await?;

        let from = devbox.status.phase;
        devbox.status.phase = next;
        devbox.status.current_node = String::new();
        self.client.update_devbox_status(&devbox).await?;

        info!(devbox = %key, %from, to = %next, image = %devbox.spec.image, "Commit handed off");
        Ok(Action::await_change())
    }
}

#[async_trait]
impl Reconciler for DaemonCommitter {
    fn name(&self) -> &str {
        "devbox-daemon"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        self.reconcile_commit(key).await
    }

    fn evict_idle(&self, ttl: Duration) -> usize {
        self.locks.evict_idle(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use devbox_core::{Devbox, DevboxSpec};

    async fn setup(phase: DevboxPhase) -> (MockCluster, DaemonCommitter, ObjectKey) {
        let cluster = MockCluster::new();
        let mut devbox = cluster
            .insert_devbox(Devbox::new(
                "ns-a",
                "box",
                DevboxSpec {
                    image: "busybox".to_string(),
                    ..Default::default()
                },
            ))
            .await;
        devbox.status.phase = phase;
        devbox.status.current_node = "node-1".to_string();
        cluster.update_devbox_status(&devbox).await.unwrap();

        let daemon = DaemonCommitter::new(Arc::new(cluster.clone()), ControllerConfig::default());
        (cluster, daemon, devbox.key())
    }

    #[tokio::test]
    async fn test_committing_becomes_stopped() {
        let (cluster, daemon, key) = setup(DevboxPhase::Committing).await;
        daemon.reconcile_commit(&key).await.unwrap();

        let devbox = cluster.devbox("ns-a", "box").await.unwrap();
        assert_eq!(devbox.status.phase, DevboxPhase::Stopped);
        assert!(devbox.status.current_node.is_empty());
        assert!(devbox.spec.image.starts_with("sealos.hub:5000/ns-a/box:"));
    }

    #[tokio::test]
    async fn test_shutdown_committing_becomes_pending() {
        let (cluster, daemon, key) = setup(DevboxPhase::ShutdownCommitting).await;
        daemon.reconcile_commit(&key).await.unwrap();

        let devbox = cluster.devbox("ns-a", "box").await.unwrap();
        assert_eq!(devbox.status.phase, DevboxPhase::Pending);
    }

    #[tokio::test]
    async fn test_other_phases_untouched() {
        let (cluster, daemon, key) = setup(DevboxPhase::Running).await;
        daemon.reconcile_commit(&key).await.unwrap();

        let devbox = cluster.devbox("ns-a", "box").await.unwrap();
        assert_eq!(devbox.status.phase, DevboxPhase::Running);
        assert_eq!(devbox.spec.image, "busybox");
        assert_eq!(cluster.writes("Devbox").await, 0);
    }

    #[tokio::test]
    async fn test_busy_key_requeues() {
        let (_, daemon, key) = setup(DevboxPhase::Committing).await;
        let _held = daemon.locks.try_acquire(&key).unwrap();
        let action = daemon.reconcile_commit(&key).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }
}
