pub mod quantities;

pub use quantities::ResourceQuantities;

use crate::devbox::Devbox;
use crate::types::{GroupVersionKind, ObjectKey};
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{de::DeserializeOwned, Serialize};

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta) -> Result<(), ResourceError> {
    let name = metadata
        .name
        .as_ref()
        .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

    if !is_valid_name(name) {
        return Err(ResourceError::InvalidName(name.clone()));
    }

    Ok(())
}

/// Object kinds the controller reads and writes
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The GroupVersionKind of this resource type
    fn gvk() -> GroupVersionKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or("default")
    }

    fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    fn is_deleting(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata()
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }

    /// Add `finalizer`; returns true when the object changed
    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    /// Remove `finalizer`; returns true when the object changed
    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let Some(finalizers) = self.metadata_mut().finalizers.as_mut() else {
            return false;
        };
        let before = finalizers.len();
        finalizers.retain(|f| f != finalizer);
        finalizers.len() != before
    }

    /// Validate the resource
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata())
    }
}

/// Resource-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let alnum = |c: u8| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes.iter().all(|&c| alnum(c) || c == b'-' || c == b'.')
}

impl Resource for Devbox {
    fn gvk() -> GroupVersionKind {
        Devbox::gvk()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(&self.metadata)?;

        // The pod name adds a 6-char suffix and must stay a valid DNS label
        if self.name().len() > 57 {
            return Err(ResourceError::ValidationFailed(format!(
                "Devbox name '{}' is longer than 57 characters",
                self.name()
            )));
        }
        if self.spec.image.is_empty() {
            return Err(ResourceError::MissingField("spec.image".to_string()));
        }

        Ok(())
    }
}

impl Resource for Pod {
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Pod")
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(&self.metadata)?;

        match &self.spec {
            Some(spec) if spec.containers.is_empty() => Err(ResourceError::ValidationFailed(
                "Pod must have at least one container".to_string(),
            )),
            Some(_) => Ok(()),
            None => Err(ResourceError::MissingField("spec".to_string())),
        }
    }
}

impl Resource for Service {
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Service")
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Secret {
    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("", "v1", "Secret")
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devbox::DevboxSpec;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("devbox"));
        assert!(is_valid_name("my-box-123"));
        assert!(is_valid_name("my.box"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("MyBox"));
        assert!(!is_valid_name("-box"));
        assert!(!is_valid_name("box-"));
        assert!(!is_valid_name("my_box"));
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut pod = Pod::default();
        assert!(pod.add_finalizer("a/b"));
        assert!(!pod.add_finalizer("a/b"));
        assert!(pod.has_finalizer("a/b"));
        assert!(pod.remove_finalizer("a/b"));
        assert!(!pod.remove_finalizer("a/b"));
        assert_eq!(pod.metadata.finalizers, Some(vec![]));
    }

    #[test]
    fn test_devbox_validation() {
        let devbox = Devbox::new(
            "ns-a",
            "box",
            DevboxSpec {
                image: "busybox".to_string(),
                ..Default::default()
            },
        );
        assert!(devbox.validate().is_ok());

        let devbox = Devbox::new("ns-a", "box", DevboxSpec::default());
        assert!(matches!(
            devbox.validate(),
            Err(ResourceError::MissingField(_))
        ));

        let long = "a".repeat(60);
        let devbox = Devbox::new(
            "ns-a",
            &long,
            DevboxSpec {
                image: "busybox".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(
            devbox.validate(),
            Err(ResourceError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_object_key() {
        let mut svc = Service::default();
        svc.metadata.name = Some("box-svc".to_string());
        svc.metadata.namespace = Some("ns-a".to_string());
        assert_eq!(svc.object_key(), ObjectKey::new("ns-a", "box-svc"));
        assert_eq!(Service::gvk().resource_name(), "services");
    }
}
