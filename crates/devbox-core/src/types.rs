use serde::{Deserialize, Serialize};
use std::fmt;

/// GroupVersionKind identifies one of the object kinds the controller touches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group ("" for the core group, "devbox.sealos.io" for Devbox)
    pub group: String,
    /// API version (e.g., "v1", "v1alpha1")
    pub version: String,
    /// Resource kind (e.g., "Pod", "Devbox")
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// The apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The API path prefix ("api/v1" or "apis/{group}/{version}")
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// The plural, lowercase resource name used in URLs
    pub fn resource_name(&self) -> String {
        let lower = self.kind.to_lowercase();
        if lower.ends_with('s') || lower.ends_with('x') {
            format!("{}es", lower)
        } else if lower.ends_with('y') {
            format!("{}ies", &lower[..lower.len() - 1])
        } else {
            format!("{}s", lower)
        }
    }

    /// Collection path inside a namespace, e.g. `/api/v1/namespaces/ns/pods`
    pub fn collection_path(&self, namespace: &str) -> String {
        format!(
            "/{}/namespaces/{}/{}",
            self.api_path(),
            namespace,
            self.resource_name()
        )
    }

    /// Object path inside a namespace, e.g. `/api/v1/namespaces/ns/pods/name`
    pub fn object_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Namespaced identity of a Devbox; the unit of locking and queueing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_api_version() {
        assert_eq!(GroupVersionKind::new("", "v1", "Pod").api_version(), "v1");
        assert_eq!(
            GroupVersionKind::new("devbox.sealos.io", "v1alpha1", "Devbox").api_version(),
            "devbox.sealos.io/v1alpha1"
        );
    }

    #[test]
    fn test_gvk_resource_name() {
        assert_eq!(GroupVersionKind::new("", "v1", "Pod").resource_name(), "pods");
        assert_eq!(
            GroupVersionKind::new("devbox.sealos.io", "v1alpha1", "Devbox").resource_name(),
            "devboxes"
        );
        assert_eq!(GroupVersionKind::new("", "v1", "Secret").resource_name(), "secrets");
    }

    #[test]
    fn test_object_paths() {
        let gvk = GroupVersionKind::new("", "v1", "Service");
        assert_eq!(
            gvk.object_path("ns-a", "box-svc"),
            "/api/v1/namespaces/ns-a/services/box-svc"
        );

        let gvk = GroupVersionKind::new("devbox.sealos.io", "v1alpha1", "Devbox");
        assert_eq!(
            gvk.collection_path("ns-a"),
            "/apis/devbox.sealos.io/v1alpha1/namespaces/ns-a/devboxes"
        );
    }

    #[test]
    fn test_object_key_display() {
        assert_eq!(ObjectKey::new("ns-a", "box").to_string(), "ns-a/box");
    }
}
