use crate::commit::last_success_image;
use crate::config::ControllerConfig;
use crate::error::Result;
use crate::sync::secret::{AUTHORIZED_KEYS_KEY, JWT_SECRET_KEY};
use devbox_core::labels::{recommended_labels, secret_name};
use devbox_core::{CommitHistory, Devbox, ResourceQuantities, FINALIZER_NAME};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, KeyToPath, ObjectFieldSelector, Pod, PodSpec,
    ResourceRequirements, SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const ENV_COMMIT_ON_STOP: &str = "SEALOS_COMMIT_ON_STOP";
pub const ENV_COMMIT_IMAGE_NAME: &str = "SEALOS_COMMIT_IMAGE_NAME";
pub const ENV_COMMIT_IMAGE_SQUASH: &str = "SEALOS_COMMIT_IMAGE_SQUASH";
pub const ENV_DEVBOX_JWT_SECRET: &str = "SEALOS_DEVBOX_JWT_SECRET";
pub const ENV_DEVBOX_NAME: &str = "SEALOS_DEVBOX_NAME";
pub const ENV_DEVBOX_POD_UID: &str = "SEALOS_DEVBOX_POD_UID";

const SSH_VOLUME_NAME: &str = "devbox-ssh-keys";
const SSH_MOUNT_PATH: &str = "/usr/start/.ssh";
const SSH_DEFAULT_MODE: i32 = 0o644;
const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 300;

fn literal_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// Variables the sandbox agent reads to commit its filesystem on stop
fn devbox_env_vars(devbox: &Devbox, history: &CommitHistory) -> Vec<EnvVar> {
    vec![
        literal_env(ENV_COMMIT_ON_STOP, "true"),
        literal_env(ENV_COMMIT_IMAGE_NAME, history.image.clone()),
        literal_env(ENV_COMMIT_IMAGE_SQUASH, "false"),
        EnvVar {
            name: ENV_DEVBOX_JWT_SECRET.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret_name(devbox.name()),
                    key: JWT_SECRET_KEY.to_string(),
                    optional: None,
                }),
                ..Default::default()
            }),
        },
        literal_env(ENV_DEVBOX_NAME, devbox.name()),
        EnvVar {
            name: ENV_DEVBOX_POD_UID.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.uid".to_string(),
                    api_version: None,
                }),
                ..Default::default()
            }),
        },
    ]
}

fn ssh_volume(devbox: &Devbox) -> Volume {
    Volume {
        name: SSH_VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name(devbox.name())),
            default_mode: Some(SSH_DEFAULT_MODE),
            items: Some(vec![KeyToPath {
                key: AUTHORIZED_KEYS_KEY.to_string(),
                path: "authorized_keys".to_string(),
                mode: None,
            }]),
            optional: None,
        }),
        ..Default::default()
    }
}

fn ssh_volume_mount() -> VolumeMount {
    VolumeMount {
        name: SSH_VOLUME_NAME.to_string(),
        mount_path: SSH_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Limits from the Devbox plus ephemeral storage; requests are limits scaled down by the rates
pub fn resource_requirements(
    devbox: &Devbox,
    config: &ControllerConfig,
) -> Result<ResourceRequirements> {
    let mut limits = devbox.spec.resource.clone();
    limits.insert(
        "ephemeral-storage".to_string(),
        Quantity(config.ephemeral_storage_limit.clone()),
    );

    let mut requests = BTreeMap::new();
    if let Some(cpu) = devbox.spec.resource.get("cpu") {
        let millicores = ResourceQuantities::parse_cpu(&cpu.0)?;
        let scaled = (millicores as f64 / config.cpu_request_rate).round() as i64;
        requests.insert(
            "cpu".to_string(),
            Quantity(ResourceQuantities::format_cpu(scaled)),
        );
    }
    if let Some(memory) = devbox.spec.resource.get("memory") {
        let bytes = ResourceQuantities::parse_memory(&memory.0)?;
        let scaled = (bytes as f64 / config.memory_request_rate).round() as i64;
        requests.insert(
            "memory".to_string(),
            Quantity(ResourceQuantities::format_memory(scaled)),
        );
    }
    requests.insert(
        "ephemeral-storage".to_string(),
        Quantity(config.ephemeral_storage_request.clone()),
    );

    Ok(ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    })
}

/// Image the next Pod starts from
pub fn select_image<'a>(devbox: &'a Devbox, config: &ControllerConfig) -> &'a str {
    if config.debug_mode {
        return &devbox.spec.image;
    }
    last_success_image(devbox).unwrap_or(&devbox.spec.image)
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// The Pod this Devbox should be running for the attempt recorded in `history`
pub fn desired_pod(
    devbox: &Devbox,
    history: &CommitHistory,
    config: &ControllerConfig,
) -> Result<Pod> {
    let runtime = &devbox.spec.config;

    let mut env = runtime.env.clone();
    env.extend(devbox_env_vars(devbox, history));

    let mut volumes = runtime.volumes.clone();
    volumes.push(ssh_volume(devbox));

    let mut volume_mounts = runtime.volume_mounts.clone();
    volume_mounts.push(ssh_volume_mount());

    let container = Container {
        name: devbox.name().to_string(),
        image: Some(select_image(devbox, config).to_string()),
        env: Some(env),
        ports: non_empty(runtime.ports.clone()),
        volume_mounts: Some(volume_mounts),
        working_dir: runtime.working_dir.clone(),
        command: non_empty(runtime.command.clone()),
        args: non_empty(runtime.args.clone()),
        resources: Some(resource_requirements(devbox, config)?),
        ..Default::default()
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(history.pod.clone()),
            namespace: Some(devbox.namespace().to_string()),
            labels: Some(recommended_labels(devbox.name())),
            owner_references: Some(vec![devbox.controller_owner_ref()]),
            finalizers: Some(vec![FINALIZER_NAME.to_string()]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
            automount_service_account_token: Some(false),
            restart_policy: Some("Never".to_string()),
            hostname: Some(devbox.name().to_string()),
            containers: vec![container],
            volumes: Some(volumes),
            runtime_class_name: devbox
                .spec
                .runtime_class_name
                .clone()
                .filter(|n| !n.is_empty()),
            node_selector: devbox.spec.node_selector.clone(),
            tolerations: devbox.spec.tolerations.clone(),
            affinity: devbox.spec.affinity.clone(),
            ..Default::default()
        }),
        status: None,
    })
}
