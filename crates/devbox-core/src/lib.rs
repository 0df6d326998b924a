//! Devbox Core - the resource model shared by the Devbox controller
//!
//! This crate provides:
//! - The Devbox custom resource (spec, status, phases, commit history)
//! - Error types with miette diagnostics
//! - Object identity, labels and child object naming
//! - Serialization helpers

pub mod devbox;
pub mod error;
pub mod labels;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use devbox::{
    CommitHistory, CommitStatus, Devbox, DevboxAction, DevboxPhase, DevboxSpec, DevboxStatus,
    NetworkSpec, NetworkStatus, NetworkType, RuntimeConfig,
};
pub use error::{DevboxError, Result};
pub use labels::{recommended_labels, Labels, FINALIZER_NAME};
pub use resources::{is_valid_name, Resource, ResourceError, ResourceQuantities};
pub use types::{GroupVersionKind, ObjectKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Pod, Secret, Service};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        DevboxError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        DevboxError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        DevboxError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        DevboxError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Load a Devbox manifest (YAML or JSON, YAML being a superset) from disk
pub fn load_devbox_manifest(path: &std::path::Path) -> Result<Devbox> {
    let data = std::fs::read_to_string(path).map_err(|source| DevboxError::ManifestRead {
        path: path.display().to_string(),
        source,
    })?;
    let devbox: Devbox = from_yaml(&data)?;

    devbox
        .validate()
        .map_err(|e| DevboxError::invalid_resource(e.to_string(), "Fix the manifest and retry"))?;

    Ok(devbox)
}
