use crate::error::Result;
use async_trait::async_trait;
use devbox_core::{Devbox, Labels};
use k8s_openapi::api::core::v1::{Event, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::DeleteOptions;

/// Trait for the cluster API the controller converges against
///
/// Every call is a single request against the API server's object store.
/// Implementations map HTTP 404/409 (and quota rejections) onto the
/// matching `ControllerError` variants so callers can branch on
/// `is_not_found()` / `is_conflict()` / `is_quota_exceeded()`.
///
/// `MockCluster` provides an in-memory implementation for tests.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    // --- Devbox ---

    async fn get_devbox(&self, namespace: &str, name: &str) -> Result<Devbox>;

    /// List Devboxes across all namespaces
    async fn list_devboxes(&self) -> Result<Vec<Devbox>>;

    /// Replace metadata and spec; status is ignored
    async fn update_devbox(&self, devbox: &Devbox) -> Result<Devbox>;

    /// Replace status through the status subresource
    async fn update_devbox_status(&self, devbox: &Devbox) -> Result<Devbox>;

    // --- Pods ---

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<Pod>>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn update_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str, options: &DeleteOptions) -> Result<()>;

    // --- Services ---

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    async fn list_services(&self, namespace: &str, selector: &Labels) -> Result<Vec<Service>>;

    async fn create_service(&self, service: &Service) -> Result<Service>;

    async fn update_service(&self, service: &Service) -> Result<Service>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    // --- Secrets ---

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn list_secrets(&self, namespace: &str, selector: &Labels) -> Result<Vec<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    async fn update_secret(&self, secret: &Secret) -> Result<Secret>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    // --- Events ---

    async fn create_event(&self, event: &Event) -> Result<()>;
}
