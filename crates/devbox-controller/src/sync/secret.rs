use crate::error::Result;
use crate::ssh::{generate_jwt_secret, generate_key_pair};
use crate::sync::owned_metadata;
use crate::traits::ClusterClient;
use devbox_core::labels::secret_name;
use devbox_core::Devbox;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const JWT_SECRET_KEY: &str = "SEALOS_DEVBOX_JWT_SECRET";
pub const PUBLIC_KEY_KEY: &str = "SEALOS_DEVBOX_PUBLIC_KEY";
pub const PRIVATE_KEY_KEY: &str = "SEALOS_DEVBOX_PRIVATE_KEY";
pub const AUTHORIZED_KEYS_KEY: &str = "SEALOS_DEVBOX_AUTHORIZED_KEYS";

/// Fill keys added after the Secret was first created. Returns true when `data` changed.
fn backfill(data: &mut BTreeMap<String, ByteString>) -> bool {
    let mut changed = false;

    if !data.contains_key(JWT_SECRET_KEY) {
        data.insert(
            JWT_SECRET_KEY.to_string(),
            ByteString(generate_jwt_secret().into_bytes()),
        );
        changed = true;
    }

    if !data.contains_key(AUTHORIZED_KEYS_KEY) {
        if let Some(public_key) = data.get(PUBLIC_KEY_KEY).cloned() {
            data.insert(AUTHORIZED_KEYS_KEY.to_string(), public_key);
            changed = true;
        }
    }

    changed
}

/// Ensure the credentials Secret exists and carries every required key.
///
/// Existing keys are never rotated.
pub async fn sync_secret(client: &dyn ClusterClient, devbox: &Devbox) -> Result<()> {
    let name = secret_name(devbox.name());

    match client.get_secret(devbox.namespace(), &name).await {
        Ok(mut secret) => {
            let data = secret.data.get_or_insert_with(BTreeMap::new);
            if backfill(data) {
                info!(devbox = %devbox.key(), "Backfilling missing secret keys");
                client.update_secret(&secret).await?;
            } else {
                debug!(devbox = %devbox.key(), "Secret up to date");
            }
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            let keys = generate_key_pair()?;
            let public_key = ByteString(keys.public_key.into_bytes());

            let secret = Secret {
                metadata: owned_metadata(devbox, &name),
                data: Some(BTreeMap::from([
                    (
                        JWT_SECRET_KEY.to_string(),
                        ByteString(generate_jwt_secret().into_bytes()),
                    ),
                    (PUBLIC_KEY_KEY.to_string(), public_key.clone()),
                    (
                        PRIVATE_KEY_KEY.to_string(),
                        ByteString(keys.private_key.into_bytes()),
                    ),
                    (AUTHORIZED_KEYS_KEY.to_string(), public_key),
                ])),
                ..Default::default()
            };

            info!(devbox = %devbox.key(), secret = %name, "Creating devbox secret");
            client.create_secret(&secret).await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use devbox_core::DevboxSpec;

    async fn setup() -> (MockCluster, Devbox) {
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
        (cluster, devbox)
    }

    #[tokio::test]
    async fn test_creates_secret_with_all_keys() {
        let (cluster, devbox) = setup().await;
        sync_secret(&cluster, &devbox).await.unwrap();

        let secret = cluster.get_secret("ns-a", "box").await.unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data[JWT_SECRET_KEY].0.len(), 32);
        assert_eq!(data[AUTHORIZED_KEYS_KEY], data[PUBLIC_KEY_KEY]);
        assert_eq!(
            secret.metadata.owner_references.unwrap()[0].uid,
            devbox.metadata.uid.unwrap()
        );
    }

    #[tokio::test]
    async fn test_second_sync_writes_nothing() {
        let (cluster, devbox) = setup().await;
        sync_secret(&cluster, &devbox).await.unwrap();
        let before = cluster.get_secret("ns-a", "box").await.unwrap();
        let writes = cluster.writes("Secret").await;

        sync_secret(&cluster, &devbox).await.unwrap();
        assert_eq!(cluster.writes("Secret").await, writes);
        assert_eq!(cluster.get_secret("ns-a", "box").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_backfills_without_rotating() {
        let (cluster, devbox) = setup().await;
        let legacy = Secret {
            metadata: owned_metadata(&devbox, "box"),
            data: Some(BTreeMap::from([
                (PUBLIC_KEY_KEY.to_string(), ByteString(b"ssh-ed25519 AAAA".to_vec())),
                (PRIVATE_KEY_KEY.to_string(), ByteString(b"private".to_vec())),
            ])),
            ..Default::default()
        };
        cluster.create_secret(&legacy).await.unwrap();

        sync_secret(&cluster, &devbox).await.unwrap();

        let data = cluster.get_secret("ns-a", "box").await.unwrap().data.unwrap();
        assert_eq!(data[PRIVATE_KEY_KEY].0, b"private");
        assert_eq!(data[AUTHORIZED_KEYS_KEY].0, b"ssh-ed25519 AAAA");
        assert!(data.contains_key(JWT_SECRET_KEY));
        assert_eq!(cluster.writes("Secret").await, 2);
    }
}
