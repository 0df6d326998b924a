use devbox_core::ResourceQuantities;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use tracing::debug;

use crate::pod::ENV_COMMIT_IMAGE_NAME;

/// Pod matcher trait
///
/// Decides whether an observed Pod still satisfies the desired Pod. A Pod that
/// fails any matcher is deleted and recreated on a later pass.
pub trait PodMatcher: Send + Sync {
    fn matches(&self, desired: &Pod, observed: &Pod) -> bool;

    /// Name of the matcher
    fn name(&self) -> &str;
}

fn first_container(pod: &Pod) -> Option<&Container> {
    pod.spec.as_ref().and_then(|s| s.containers.first())
}

fn quantity_map(
    container: &Container,
    pick: impl Fn(&k8s_openapi::api::core::v1::ResourceRequirements) -> Option<&BTreeMap<String, Quantity>>,
) -> BTreeMap<String, Quantity> {
    container
        .resources
        .as_ref()
        .and_then(pick)
        .cloned()
        .unwrap_or_default()
}

fn same_quantities(
    resources: &[&str],
    desired: &BTreeMap<String, Quantity>,
    observed: &BTreeMap<String, Quantity>,
) -> bool {
    resources.iter().all(|r| match (desired.get(*r), observed.get(*r)) {
        (Some(a), Some(b)) => ResourceQuantities::same_quantity(r, a, b),
        (None, None) => true,
        _ => false,
    })
}

/// CPU and memory requests and limits
pub struct ResourceMatcher;

impl PodMatcher for ResourceMatcher {
    fn matches(&self, desired: &Pod, observed: &Pod) -> bool {
        let (Some(want), Some(have)) = (first_container(desired), first_container(observed)) else {
            return false;
        };
        const TRACKED: [&str; 2] = ["cpu", "memory"];

        same_quantities(
            &TRACKED,
            &quantity_map(want, |r| r.limits.as_ref()),
            &quantity_map(have, |r| r.limits.as_ref()),
        ) && same_quantities(
            &TRACKED,
            &quantity_map(want, |r| r.requests.as_ref()),
            &quantity_map(have, |r| r.requests.as_ref()),
        )
    }

    fn name(&self) -> &str {
        "ResourceMatcher"
    }
}

/// Environment variables, ignoring the per-attempt commit image name
pub struct EnvVarMatcher;

impl EnvVarMatcher {
    fn comparable(container: &Container) -> BTreeMap<&str, &EnvVar> {
        container
            .env
            .iter()
            .flatten()
            .filter(|e| e.name != ENV_COMMIT_IMAGE_NAME)
            .map(|e| (e.name.as_str(), e))
            .collect()
    }
}

impl PodMatcher for EnvVarMatcher {
    fn matches(&self, desired: &Pod, observed: &Pod) -> bool {
        match (first_container(desired), first_container(observed)) {
            (Some(want), Some(have)) => Self::comparable(want) == Self::comparable(have),
            _ => false,
        }
    }

    fn name(&self) -> &str {
        "EnvVarMatcher"
    }
}

/// Container ports; an unset protocol means TCP
pub struct PortMatcher;

impl PortMatcher {
    fn normalized(container: &Container) -> Vec<(i32, String, Option<String>)> {
        let mut ports: Vec<_> = container
            .ports
            .iter()
            .flatten()
            .map(|p: &ContainerPort| {
                (
                    p.container_port,
                    p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                    p.name.clone(),
                )
            })
            .collect();
        ports.sort();
        ports
    }
}

impl PodMatcher for PortMatcher {
    fn matches(&self, desired: &Pod, observed: &Pod) -> bool {
        match (first_container(desired), first_container(observed)) {
            (Some(want), Some(have)) => Self::normalized(want) == Self::normalized(have),
            _ => false,
        }
    }

    fn name(&self) -> &str {
        "PortMatcher"
    }
}

/// Ephemeral-storage limit
pub struct StorageLimitMatcher;

impl PodMatcher for StorageLimitMatcher {
    fn matches(&self, desired: &Pod, observed: &Pod) -> bool {
        let (Some(want), Some(have)) = (first_container(desired), first_container(observed)) else {
            return false;
        };
        same_quantities(
            &["ephemeral-storage"],
            &quantity_map(want, |r| r.limits.as_ref()),
            &quantity_map(have, |r| r.limits.as_ref()),
        )
    }

    fn name(&self) -> &str {
        "StorageLimitMatcher"
    }
}

/// The matcher set applied to every observed Pod
pub fn default_matchers() -> Vec<Box<dyn PodMatcher>> {
    vec![
        Box::new(ResourceMatcher),
        Box::new(EnvVarMatcher),
        Box::new(PortMatcher),
        Box::new(StorageLimitMatcher),
    ]
}

/// True when every matcher accepts the observed Pod
pub fn pod_matches_expectations(
    desired: &Pod,
    observed: &Pod,
    matchers: &[Box<dyn PodMatcher>],
) -> bool {
    for matcher in matchers {
        if !matcher.matches(desired, observed) {
            debug!(
                matcher = matcher.name(),
                pod = observed.metadata.name.as_deref().unwrap_or_default(),
                "Pod does not match desired spec"
            );
            return false;
        }
    }
    true
}
