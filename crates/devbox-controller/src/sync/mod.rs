//! Synchronizers for the three child objects of a Devbox.
//!
//! They run in a fixed order each pass: Secret, then Service (NodePort
//! networking only), then Pod. Each one mutates the in-memory Devbox status;
//! the reconciler persists it once at the end of the pass.

pub mod pod;
pub mod secret;
pub mod service;

pub use pod::{delete_pod, sync_pod, PodSyncOutcome};
pub use secret::sync_secret;
pub use service::{desired_service, sync_service};

use crate::error::{ignore_not_found, Result};
use crate::traits::ClusterClient;
use devbox_core::{recommended_labels, Devbox, Resource, FINALIZER_NAME};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{info, warn};

/// Metadata for a child object: recommended labels plus a controller owner reference
pub fn owned_metadata(devbox: &Devbox, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(devbox.namespace().to_string()),
        labels: Some(recommended_labels(devbox.name())),
        owner_references: Some(vec![devbox.controller_owner_ref()]),
        ..Default::default()
    }
}

/// Delete every Pod, Service and Secret labelled for this Devbox.
///
/// Pod finalizers are stripped first; a failure to strip one is logged and
/// cleanup carries on with the remaining children.
pub async fn remove_all(client: &dyn ClusterClient, devbox: &Devbox) -> Result<()> {
    let namespace = devbox.namespace();
    let selector = recommended_labels(devbox.name());

    let pods = client.list_pods(namespace, &selector).await?;
    for mut child in pods {
        if child.remove_finalizer(FINALIZER_NAME) {
            if let Err(e) = client.update_pod(&child).await {
                warn!(devbox = %devbox.key(), pod = %child.name(), error = %e, "Failed to remove pod finalizer");
            }
        }
        ignore_not_found(
            client
                .delete_pod(namespace, child.name(), &pod::force_delete_options())
                .await,
        )?;
    }

    for service in client.list_services(namespace, &selector).await? {
        ignore_not_found(client.delete_service(namespace, service.name()).await)?;
    }

    for secret in client.list_secrets(namespace, &selector).await? {
        ignore_not_found(client.delete_secret(namespace, secret.name()).await)?;
    }

    info!(devbox = %devbox.key(), "Removed all devbox resources");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use devbox_core::DevboxSpec;
    use k8s_openapi::api::core::v1::{Pod, Secret};

    #[tokio::test]
    async fn test_remove_all_clears_children() {
        let cluster = MockCluster::new();
        let devbox = cluster
            .insert_devbox(Devbox::new(
                "ns-a",
                "box",
                DevboxSpec {
                    image: "busybox".to_string(),
                    ..Default::default()
                },
            ))
            .await;

        let mut meta = owned_metadata(&devbox, "box-abcde");
        meta.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
        cluster
            .create_pod(&Pod {
                metadata: meta,
                ..Default::default()
            })
            .await
            .unwrap();
        cluster
            .create_service(&desired_service(&devbox))
            .await
            .unwrap();
        cluster
            .create_secret(&Secret {
                metadata: owned_metadata(&devbox, "box"),
                ..Default::default()
            })
            .await
            .unwrap();

        // A child of another devbox in the same namespace survives
        let other = Devbox::new("ns-a", "other", DevboxSpec::default());
        cluster
            .create_secret(&Secret {
                metadata: owned_metadata(&other, "other"),
                ..Default::default()
            })
            .await
            .unwrap();

        remove_all(&cluster, &devbox).await.unwrap();

        assert!(cluster.pods("ns-a").await.is_empty());
        assert!(cluster.services("ns-a").await.is_empty());
        let secrets = cluster.secrets("ns-a").await;
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].metadata.name.as_deref(), Some("other"));
    }
}
