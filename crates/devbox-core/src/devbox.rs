//! The Devbox custom resource: a per-user development sandbox.
//!
//! Spec is owned by users; status is owned by the controller. Everything in
//! status can be re-derived from spec plus the observed child objects, except
//! `commit_history`, which is an append-only record of image-snapshot attempts.

use crate::types::{GroupVersionKind, ObjectKey};
use k8s_openapi::api::core::v1::{
    Affinity, ContainerPort, ContainerState, EnvVar, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEVBOX_GROUP: &str = "devbox.sealos.io";
pub const DEVBOX_VERSION: &str = "v1alpha1";
pub const DEVBOX_KIND: &str = "Devbox";

/// Lifecycle position of a Devbox
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevboxPhase {
    #[default]
    Pending,
    Running,
    Restarting,
    AdvancedStopping,
    AdvancedStopped,
    Releasing,
    Committing,
    Shutdown,
    ShutdownCommitting,
    Stopped,
    Error,
    /// Any phase string this controller does not understand
    #[serde(other)]
    Unknown,
}

impl DevboxPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevboxPhase::Pending => "Pending",
            DevboxPhase::Running => "Running",
            DevboxPhase::Restarting => "Restarting",
            DevboxPhase::AdvancedStopping => "AdvancedStopping",
            DevboxPhase::AdvancedStopped => "AdvancedStopped",
            DevboxPhase::Releasing => "Releasing",
            DevboxPhase::Committing => "Committing",
            DevboxPhase::Shutdown => "Shutdown",
            DevboxPhase::ShutdownCommitting => "ShutdownCommitting",
            DevboxPhase::Stopped => "Stopped",
            DevboxPhase::Error => "Error",
            DevboxPhase::Unknown => "Unknown",
        }
    }

    /// Phases in which the Devbox must not have a Pod
    pub fn is_quiescent(&self) -> bool {
        matches!(
            self,
            DevboxPhase::Restarting
                | DevboxPhase::AdvancedStopping
                | DevboxPhase::Releasing
                | DevboxPhase::Shutdown
                | DevboxPhase::Committing
                | DevboxPhase::ShutdownCommitting
                | DevboxPhase::Stopped
                | DevboxPhase::AdvancedStopped
        )
    }

    /// Phases in which the NodePort Service must exist
    pub fn is_reachable(&self) -> bool {
        matches!(self, DevboxPhase::Running | DevboxPhase::AdvancedStopped)
    }
}

impl fmt::Display for DevboxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Desired action requested by the user (or by the controller on deletion)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevboxAction {
    #[default]
    None,
    Start,
    Stop,
    Restart,
    AdvancedStop,
    Shutdown,
}

impl fmt::Display for DevboxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DevboxAction::None => "None",
            DevboxAction::Start => "Start",
            DevboxAction::Stop => "Stop",
            DevboxAction::Restart => "Restart",
            DevboxAction::AdvancedStop => "AdvancedStop",
            DevboxAction::Shutdown => "Shutdown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    #[default]
    NodePort,
    Tailnet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_ports: Vec<ContainerPort>,
}

/// Container-level configuration of the sandbox
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevboxSpec {
    /// Initial image; also the image used in debug mode
    pub image: String,
    #[serde(default)]
    pub action: DevboxAction,
    /// Resource limits (`cpu`, `memory`)
    #[serde(default)]
    pub resource: BTreeMap<String, Quantity>,
    #[serde(default, rename = "network")]
    pub network: NetworkSpec,
    #[serde(default)]
    pub config: RuntimeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    #[serde(rename = "type", default)]
    pub network_type: NetworkType,
    #[serde(default)]
    pub node_port: i32,
}

/// Outcome of one image-snapshot attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitStatus::Pending => "Pending",
            CommitStatus::Success => "Success",
            CommitStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// One image-snapshot attempt, tied to exactly one Pod incarnation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitHistory {
    /// Image reference the Pod's filesystem is committed to when it stops
    pub image: String,
    pub time: Time,
    /// Name of the Pod this attempt ran in
    pub pod: String,
    /// Confirmed outcome; only moves Pending -> Success|Failed
    #[serde(default)]
    pub status: CommitStatus,
    /// Best-effort outcome inferred from live container state
    #[serde(default)]
    pub predicated_status: CommitStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevboxStatus {
    #[serde(default)]
    pub phase: DevboxPhase,
    #[serde(default)]
    pub state: ContainerState,
    #[serde(default)]
    pub last_termination_state: ContainerState,
    #[serde(default)]
    pub network: NetworkStatus,
    #[serde(default)]
    pub commit_history: Vec<CommitHistory>,
    #[serde(default)]
    pub current_node: String,
}

/// The Devbox custom resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Devbox {
    #[serde(default = "Devbox::default_api_version")]
    pub api_version: String,
    #[serde(default = "Devbox::default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: DevboxSpec,
    #[serde(default)]
    pub status: DevboxStatus,
}

impl Default for Devbox {
    fn default() -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta::default(),
            spec: DevboxSpec::default(),
            status: DevboxStatus::default(),
        }
    }
}

impl Devbox {
    pub fn new(namespace: &str, name: &str, spec: DevboxSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec,
            ..Default::default()
        }
    }

    fn default_api_version() -> String {
        format!("{}/{}", DEVBOX_GROUP, DEVBOX_VERSION)
    }

    fn default_kind() -> String {
        DEVBOX_KIND.to_string()
    }

    pub fn gvk() -> GroupVersionKind {
        GroupVersionKind::new(DEVBOX_GROUP, DEVBOX_VERSION, DEVBOX_KIND)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Owner reference marking a child as controlled by this Devbox
    pub fn controller_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name().to_string(),
            uid: self.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}
