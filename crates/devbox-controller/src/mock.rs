use crate::error::{ControllerError, Result};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use chrono::Utc;
use devbox_core::labels::selector_matches;
use devbox_core::{Devbox, DevboxPhase, Labels, ObjectKey, Resource};
use k8s_openapi::api::core::v1::{Event, Pod, PodStatus, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{DeleteOptions, Time};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const FIRST_NODE_PORT: i32 = 30000;

/// In-memory object store behind `MockCluster`
#[derive(Default)]
struct MockState {
    devboxes: BTreeMap<ObjectKey, Devbox>,
    pods: BTreeMap<ObjectKey, Pod>,
    services: BTreeMap<ObjectKey, Service>,
    secrets: BTreeMap<ObjectKey, Secret>,
    events: Vec<Event>,
    resource_version: u64,
    next_node_port: i32,
    allocate_node_ports: bool,
    reject_pods_over_quota: bool,
    devbox_conflicts: usize,
    phase_on_pod_list: Option<DevboxPhase>,
    writes: HashMap<&'static str, usize>,
}

impl MockState {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn record_write(&mut self, kind: &'static str) {
        *self.writes.entry(kind).or_default() += 1;
    }

    fn allocate_node_port(&mut self) -> i32 {
        let port = self.next_node_port;
        self.next_node_port += 1;
        port
    }
}

/// Mock cluster for testing reconcilers without an API server
///
/// Behaves like the API server for the parts the controller relies on:
/// resourceVersion-based optimistic concurrency, finalizer-aware deletion
/// (the object lingers with a deletionTimestamp while finalizers remain),
/// NodePort allocation for NodePort Services, and server-owned Pod status.
/// Quota rejections and Devbox update conflicts can be injected.
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn store_create<T: Resource>(
    store: &mut BTreeMap<ObjectKey, T>,
    mut object: T,
    version: String,
    kind: &str,
) -> Result<T> {
    let key = object.object_key();
    if store.contains_key(&key) {
        return Err(ControllerError::already_exists(kind, key.to_string()));
    }

    let meta = object.metadata_mut();
    meta.namespace = Some(key.namespace.clone());
    meta.resource_version = Some(version);
    meta.uid = Some(Uuid::new_v4().to_string());
    meta.creation_timestamp = Some(Time(Utc::now()));
    meta.deletion_timestamp = None;

    store.insert(key, object.clone());
    Ok(object)
}

/// Replace an object, enforcing resourceVersion and preserving server-owned metadata
fn store_replace<T: Resource>(
    store: &mut BTreeMap<ObjectKey, T>,
    mut object: T,
    version: String,
    kind: &str,
) -> Result<T> {
    let key = object.object_key();
    let current = store
        .get(&key)
        .ok_or_else(|| ControllerError::not_found(kind, key.to_string()))?;

    let current_meta = current.metadata();
    if let Some(expected) = &object.metadata().resource_version {
        if current_meta.resource_version.as_ref() != Some(expected) {
            return Err(ControllerError::conflict(kind, key.to_string()));
        }
    }

    let uid = current_meta.uid.clone();
    let created = current_meta.creation_timestamp.clone();
    let deleting = current_meta.deletion_timestamp.clone();

    let meta = object.metadata_mut();
    meta.namespace = Some(key.namespace.clone());
    meta.uid = uid;
    meta.creation_timestamp = created;
    meta.deletion_timestamp = deleting;
    meta.resource_version = Some(version);

    let finalized = object.is_deleting()
        && object
            .metadata()
            .finalizers
            .as_ref()
            .is_none_or(|f| f.is_empty());
    if finalized {
        store.remove(&key);
    } else {
        store.insert(key, object.clone());
    }
    Ok(object)
}

/// Delete an object, or mark it deleting while finalizers remain
fn store_delete<T: Resource>(
    store: &mut BTreeMap<ObjectKey, T>,
    key: ObjectKey,
    version: String,
    kind: &str,
) -> Result<()> {
    let object = store
        .get_mut(&key)
        .ok_or_else(|| ControllerError::not_found(kind, key.to_string()))?;

    let has_finalizers = object
        .metadata()
        .finalizers
        .as_ref()
        .is_some_and(|f| !f.is_empty());

    if has_finalizers {
        let meta = object.metadata_mut();
        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Time(Utc::now()));
            meta.resource_version = Some(version);
        }
    } else {
        store.remove(&key);
    }
    Ok(())
}

fn store_list<T: Resource>(
    store: &BTreeMap<ObjectKey, T>,
    namespace: &str,
    selector: &Labels,
) -> Vec<T> {
    store
        .values()
        .filter(|o| o.namespace() == namespace)
        .filter(|o| selector_matches(selector, o.metadata().labels.as_ref()))
        .cloned()
        .collect()
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState {
                next_node_port: FIRST_NODE_PORT,
                allocate_node_ports: true,
                ..Default::default()
            })),
        }
    }

    // --- Test setup and inspection ---

    /// Create a Devbox as a user would
    pub async fn insert_devbox(&self, devbox: Devbox) -> Devbox {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let key = devbox.key();
        let mut devbox = devbox;
        devbox.metadata.namespace = Some(key.namespace.clone());
        devbox.metadata.resource_version = Some(version);
        devbox.metadata.uid = Some(Uuid::new_v4().to_string());
        devbox.metadata.creation_timestamp = Some(Time(Utc::now()));
        state.devboxes.insert(key, devbox.clone());
        devbox
    }

    /// Request deletion of a Devbox as a user would
    pub async fn delete_devbox(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        store_delete(
            &mut state.devboxes,
            ObjectKey::new(namespace, name),
            version,
            "Devbox",
        )
    }

    pub async fn devbox(&self, namespace: &str, name: &str) -> Option<Devbox> {
        let state = self.state.read().await;
        state.devboxes.get(&ObjectKey::new(namespace, name)).cloned()
    }

    pub async fn pods(&self, namespace: &str) -> Vec<Pod> {
        let state = self.state.read().await;
        store_list(&state.pods, namespace, &Labels::new())
    }

    pub async fn services(&self, namespace: &str) -> Vec<Service> {
        let state = self.state.read().await;
        store_list(&state.services, namespace, &Labels::new())
    }

    pub async fn secrets(&self, namespace: &str) -> Vec<Secret> {
        let state = self.state.read().await;
        store_list(&state.secrets, namespace, &Labels::new())
    }

    pub async fn events(&self) -> Vec<Event> {
        self.state.read().await.events.clone()
    }

    /// Number of create/update/delete calls made for `kind` ("Pod", "Service", ...)
    pub async fn writes(&self, kind: &str) -> usize {
        let state = self.state.read().await;
        state.writes.get(kind).copied().unwrap_or(0)
    }

    /// Simulate the kubelet reporting Pod status
    pub async fn set_pod_status(&self, namespace: &str, name: &str, status: PodStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let pod = state
            .pods
            .get_mut(&ObjectKey::new(namespace, name))
            .ok_or_else(|| ControllerError::not_found("Pod", format!("{}/{}", namespace, name)))?;
        pod.status = Some(status);
        pod.metadata.resource_version = Some(version);
        Ok(())
    }

    /// Reject every Pod create with a quota error while set
    pub async fn set_pod_quota_exceeded(&self, exceeded: bool) {
        self.state.write().await.reject_pods_over_quota = exceeded;
    }

    /// Stop allocating NodePorts on Service writes
    pub async fn set_node_port_allocation(&self, enabled: bool) {
        self.state.write().await.allocate_node_ports = enabled;
    }

    /// Move every Devbox in the listed namespace to `phase` when the next
    /// Pod list is served, as a concurrent status writer would
    pub async fn set_phase_on_next_pod_list(&self, phase: DevboxPhase) {
        self.state.write().await.phase_on_pod_list = Some(phase);
    }

    /// Fail the next `count` Devbox spec updates with a conflict
    pub async fn inject_devbox_conflicts(&self, count: usize) {
        self.state.write().await.devbox_conflicts = count;
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get_devbox(&self, namespace: &str, name: &str) -> Result<Devbox> {
        self.devbox(namespace, name)
            .await
            .ok_or_else(|| ControllerError::not_found("Devbox", format!("{}/{}", namespace, name)))
    }

    async fn list_devboxes(&self) -> Result<Vec<Devbox>> {
        Ok(self.state.read().await.devboxes.values().cloned().collect())
    }

    async fn update_devbox(&self, devbox: &Devbox) -> Result<Devbox> {
        let mut state = self.state.write().await;
        if state.devbox_conflicts > 0 {
            state.devbox_conflicts -= 1;
            return Err(ControllerError::conflict("Devbox", devbox.key().to_string()));
        }

        let key = devbox.key();
        let mut devbox = devbox.clone();
        if let Some(current) = state.devboxes.get(&key) {
            devbox.status = current.status.clone();
        }
        let version = state.next_version();
        state.record_write("Devbox");
        debug!("Mock: devbox updated: {}", key);
        store_replace(&mut state.devboxes, devbox, version, "Devbox")
    }

    async fn update_devbox_status(&self, devbox: &Devbox) -> Result<Devbox> {
        let mut state = self.state.write().await;
        let key = devbox.key();
        let mut current = state
            .devboxes
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Devbox", key.to_string()))?;

        if devbox.metadata.resource_version.is_some()
            && devbox.metadata.resource_version != current.metadata.resource_version
        {
            return Err(ControllerError::conflict("Devbox", key.to_string()));
        }

        current.status = devbox.status.clone();
        current.metadata.resource_version = Some(state.next_version());
        state.record_write("DevboxStatus");
        state.devboxes.insert(key, current.clone());
        Ok(current)
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<Pod>> {
        let mut state = self.state.write().await;
        if let Some(phase) = state.phase_on_pod_list.take() {
            let keys: Vec<ObjectKey> = state
                .devboxes
                .keys()
                .filter(|k| k.namespace == namespace)
                .cloned()
                .collect();
            for key in keys {
                let version = state.next_version();
                if let Some(devbox) = state.devboxes.get_mut(&key) {
                    devbox.status.phase = phase;
                    devbox.metadata.resource_version = Some(version);
                }
                state.record_write("DevboxStatus");
            }
        }
        Ok(store_list(&state.pods, namespace, selector))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.write().await;
        if state.reject_pods_over_quota {
            return Err(ControllerError::quota_exceeded(
                "Pod",
                pod.object_key().to_string(),
                "pods is forbidden: exceeded quota: quota, requested: cpu=1",
            ));
        }

        let mut pod = pod.clone();
        pod.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        let version = state.next_version();
        state.record_write("Pod");
        debug!("Mock: pod created: {}", pod.object_key());
        store_create(&mut state.pods, pod, version, "Pod")
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.state.write().await;
        let key = pod.object_key();
        let mut pod = pod.clone();
        if let Some(current) = state.pods.get(&key) {
            pod.status = current.status.clone();
        }
        let version = state.next_version();
        state.record_write("Pod");
        store_replace(&mut state.pods, pod, version, "Pod")
    }

    async fn delete_pod(&self, namespace: &str, name: &str, _options: &DeleteOptions) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.record_write("Pod");
        debug!("Mock: pod deleted: {}/{}", namespace, name);
        store_delete(&mut state.pods, ObjectKey::new(namespace, name), version, "Pod")
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        let state = self.state.read().await;
        state
            .services
            .get(&ObjectKey::new(namespace, name))
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Service", format!("{}/{}", namespace, name)))
    }

    async fn list_services(&self, namespace: &str, selector: &Labels) -> Result<Vec<Service>> {
        Ok(store_list(&self.state.read().await.services, namespace, selector))
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let mut state = self.state.write().await;
        let mut service = service.clone();
        allocate_node_ports(&mut state, &mut service, None);
        let version = state.next_version();
        state.record_write("Service");
        store_create(&mut state.services, service, version, "Service")
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        let mut state = self.state.write().await;
        let key = service.object_key();
        let previous = state.services.get(&key).cloned();
        let mut service = service.clone();
        allocate_node_ports(&mut state, &mut service, previous.as_ref());
        let version = state.next_version();
        state.record_write("Service");
        store_replace(&mut state.services, service, version, "Service")
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.record_write("Service");
        store_delete(
            &mut state.services,
            ObjectKey::new(namespace, name),
            version,
            "Service",
        )
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let state = self.state.read().await;
        state
            .secrets
            .get(&ObjectKey::new(namespace, name))
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Secret", format!("{}/{}", namespace, name)))
    }

    async fn list_secrets(&self, namespace: &str, selector: &Labels) -> Result<Vec<Secret>> {
        Ok(store_list(&self.state.read().await.secrets, namespace, selector))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.record_write("Secret");
        store_create(&mut state.secrets, secret.clone(), version, "Secret")
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.record_write("Secret");
        store_replace(&mut state.secrets, secret.clone(), version, "Secret")
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        state.record_write("Secret");
        store_delete(
            &mut state.secrets,
            ObjectKey::new(namespace, name),
            version,
            "Secret",
        )
    }

    async fn create_event(&self, event: &Event) -> Result<()> {
        self.state.write().await.events.push(event.clone());
        Ok(())
    }
}

/// Fill unset NodePorts, keeping any previously allocated port at the same index
fn allocate_node_ports(state: &mut MockState, service: &mut Service, previous: Option<&Service>) {
    if !state.allocate_node_ports {
        return;
    }
    let Some(spec) = service.spec.as_mut() else {
        return;
    };
    if spec.type_.as_deref() != Some("NodePort") {
        return;
    }

    let previous_ports = previous
        .and_then(|s| s.spec.as_ref())
        .and_then(|s| s.ports.clone())
        .unwrap_or_default();

    for (i, port) in spec.ports.iter_mut().flatten().enumerate() {
        if port.node_port.unwrap_or(0) != 0 {
            continue;
        }
        let kept = previous_ports
            .get(i)
            .and_then(|p| p.node_port)
            .filter(|p| *p != 0);
        port.node_port = Some(match kept {
            Some(p) => p,
            None => state.allocate_node_port(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbox_core::DevboxSpec;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod(name: &str, finalizers: Option<Vec<String>>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns-a".to_string()),
                finalizers,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let cluster = MockCluster::new();
        let created = cluster.create_pod(&pod("p", None)).await.unwrap();

        cluster.update_pod(&created).await.unwrap();
        let err = cluster.update_pod(&created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_finalizer_defers_deletion() {
        let cluster = MockCluster::new();
        cluster
            .create_pod(&pod("p", Some(vec!["x/y".to_string()])))
            .await
            .unwrap();

        cluster
            .delete_pod("ns-a", "p", &DeleteOptions::default())
            .await
            .unwrap();
        let pods = cluster.pods("ns-a").await;
        assert_eq!(pods.len(), 1);
        assert!(pods[0].metadata.deletion_timestamp.is_some());

        let mut lingering = pods[0].clone();
        lingering.remove_finalizer("x/y");
        cluster.update_pod(&lingering).await.unwrap();
        assert!(cluster.pods("ns-a").await.is_empty());
    }

    #[tokio::test]
    async fn test_node_port_allocation_is_stable() {
        let cluster = MockCluster::new();
        let service = Service {
            metadata: ObjectMeta {
                name: Some("box-svc".to_string()),
                namespace: Some("ns-a".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: 22,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = cluster.create_service(&service).await.unwrap();
        let port = created.spec.as_ref().unwrap().ports.as_ref().unwrap()[0].node_port;
        assert_eq!(port, Some(FIRST_NODE_PORT));

        let mut resent = service.clone();
        resent.metadata.resource_version = created.metadata.resource_version.clone();
        let updated = cluster.update_service(&resent).await.unwrap();
        assert_eq!(
            updated.spec.unwrap().ports.unwrap()[0].node_port,
            Some(FIRST_NODE_PORT)
        );
    }

    #[tokio::test]
    async fn test_update_devbox_keeps_status() {
        let cluster = MockCluster::new();
        let mut devbox = cluster
            .insert_devbox(Devbox::new("ns-a", "box", DevboxSpec::default()))
            .await;

        devbox.status.current_node = "node-1".to_string();
        let devbox = cluster.update_devbox_status(&devbox).await.unwrap();

        let mut changed = devbox.clone();
        changed.status.current_node = String::new();
        changed.spec.image = "busybox".to_string();
        let updated = cluster.update_devbox(&changed).await.unwrap();
        assert_eq!(updated.status.current_node, "node-1");
        assert_eq!(updated.spec.image, "busybox");
    }

    #[tokio::test]
    async fn test_quota_injection() {
        let cluster = MockCluster::new();
        cluster.set_pod_quota_exceeded(true).await;
        let err = cluster.create_pod(&pod("p", None)).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(cluster.writes("Pod").await, 0);
    }
}
