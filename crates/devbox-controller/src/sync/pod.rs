use crate::commit::{finalize, next_commit_history, update_actual, update_predicted};
use crate::config::ControllerConfig;
use crate::error::{ignore_not_found, ControllerError, Result};
use crate::matcher::{pod_matches_expectations, PodMatcher};
use crate::phase::{transition, PodEffect, PodFacts, PodPhase};
use crate::pod::desired_pod;
use crate::traits::ClusterClient;
use devbox_core::{recommended_labels, Devbox, DevboxPhase, Resource, FINALIZER_NAME};
use k8s_openapi::api::core::v1::{ContainerState, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::DeleteOptions;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one pod synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSyncOutcome {
    /// Phase to adopt; `None` keeps the current one
    pub next_phase: Option<DevboxPhase>,
    /// Set when the Pod create was rejected by a ResourceQuota
    pub quota_exceeded: Option<String>,
    /// Set when a Pod was created or deleted
    pub changed: Option<String>,
    pub requeue_after: Option<Duration>,
}

/// Zero grace period, background propagation
pub fn force_delete_options() -> DeleteOptions {
    DeleteOptions {
        grace_period_seconds: Some(0),
        propagation_policy: Some("Background".to_string()),
        ..Default::default()
    }
}

fn first_container_state(pod: &Pod) -> Option<&ContainerState> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|c| c.first())
        .and_then(|c| c.state.as_ref())
}

fn has_container_statuses(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|c| !c.is_empty())
}

/// Record the Pod's final container state and settle its history entry
fn record_termination(devbox: &mut Devbox, pod: &Pod) {
    if let Some(state) = first_container_state(pod) {
        devbox.status.last_termination_state = state.clone();
    }
    finalize(devbox, pod);
}

async fn strip_finalizer(client: &dyn ClusterClient, pod: &Pod) -> Result<()> {
    let mut pod = pod.clone();
    if pod.remove_finalizer(FINALIZER_NAME) {
        ignore_not_found(client.update_pod(&pod).await.map(|_| ()))?;
    }
    Ok(())
}

/// Strip the finalizer, force-delete the Pod and settle its history entry
pub async fn delete_pod(client: &dyn ClusterClient, devbox: &mut Devbox, pod: &Pod) -> Result<()> {
    strip_finalizer(client, pod).await?;
    ignore_not_found(
        client
            .delete_pod(devbox.namespace(), pod.name(), &force_delete_options())
            .await,
    )?;
    info!(devbox = %devbox.key(), pod = %pod.name(), "Deleted devbox pod");
    record_termination(devbox, pod);
    Ok(())
}

/// A Pod already being deleted: release it and settle its history entry
async fn handle_pod_deleted(
    client: &dyn ClusterClient,
    devbox: &mut Devbox,
    pod: &Pod,
) -> Result<()> {
    devbox.status.current_node = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .unwrap_or_default();
    strip_finalizer(client, pod).await?;
    info!(devbox = %devbox.key(), pod = %pod.name(), "Released terminating devbox pod");
    record_termination(devbox, pod);
    Ok(())
}

/// Force-delete every Pod when more than one is found. Errors are logged only.
async fn delete_extra_pods(client: &dyn ClusterClient, devbox: &Devbox, pods: &[Pod]) {
    for pod in pods {
        if let Err(e) = strip_finalizer(client, pod).await {
            warn!(devbox = %devbox.key(), pod = %pod.name(), error = %e, "Failed to remove pod finalizer");
        }
        if let Err(e) = ignore_not_found(
            client
                .delete_pod(devbox.namespace(), pod.name(), &force_delete_options())
                .await,
        ) {
            warn!(devbox = %devbox.key(), pod = %pod.name(), error = %e, "Failed to delete pod");
        }
    }
}

/// Converge the Devbox's single Pod with its current phase.
///
/// Mutates `devbox.status` (state, last termination state, current node,
/// commit history) and returns the phase to adopt. Never changes the phase
/// itself.
pub async fn sync_pod(
    client: &dyn ClusterClient,
    config: &ControllerConfig,
    matchers: &[Box<dyn PodMatcher>],
    devbox: &mut Devbox,
) -> Result<PodSyncOutcome> {
    let namespace = devbox.namespace().to_string();
    let pods = client
        .list_pods(&namespace, &recommended_labels(devbox.name()))
        .await?;

    if pods.len() > 1 {
        warn!(devbox = %devbox.key(), count = pods.len(), "Multiple pods found, deleting all");
        delete_extra_pods(client, devbox, &pods).await;
        return Err(ControllerError::too_many_pods(devbox.key().to_string(), pods.len()));
    }
    let observed = pods.into_iter().next();
    let phase = devbox.status.phase;

    // The desired Pod only matters while Running
    let desired = if phase == DevboxPhase::Running {
        let history = next_commit_history(&config.commit_image_registry, devbox);
        let pod = desired_pod(devbox, &history, config)?;
        Some((history, pod))
    } else {
        None
    };

    let facts = observed.as_ref().map(|pod| PodFacts {
        name: pod.name().to_string(),
        terminating: pod.is_deleting(),
        container_started: has_container_statuses(pod),
        matches_desired: desired
            .as_ref()
            .is_some_and(|(_, want)| pod_matches_expectations(want, pod, matchers)),
        pod_phase: PodPhase::of(pod),
    });

    let step = transition(phase, facts.as_ref())?;
    debug!(devbox = %devbox.key(), phase = %phase, effect = ?step.effect, "Pod transition");

    if let Some(pod) = observed.as_ref().filter(|_| phase != DevboxPhase::Pending) {
        devbox.status.state = if phase == DevboxPhase::Running {
            first_container_state(pod).cloned().unwrap_or_default()
        } else {
            ContainerState::default()
        };
        update_predicted(devbox, pod);
    }

    let mut outcome = PodSyncOutcome {
        next_phase: step.next_phase,
        ..Default::default()
    };

    match (step.effect, observed) {
        (PodEffect::Create, _) => {
            let Some((history, pod)) = desired else {
                return Err(ControllerError::internal_error(
                    "pod creation requested outside the Running phase",
                ));
            };
            match client.create_pod(&pod).await {
                Ok(_) => {
                    info!(devbox = %devbox.key(), pod = %history.pod, image = %history.image, "Created devbox pod");
                    outcome.changed = Some(format!("Created pod {}", history.pod));
                    devbox.status.commit_history.push(history);
                    outcome.requeue_after = Some(config.poll_interval);
                }
                Err(e) if e.is_quota_exceeded() => {
                    warn!(devbox = %devbox.key(), error = %e, "Pod creation exceeded quota");
                    outcome.quota_exceeded = Some(e.to_string());
                    outcome.requeue_after = Some(config.quota_retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
        (PodEffect::Delete, Some(pod)) => {
            delete_pod(client, devbox, &pod).await?;
            outcome.changed = Some(format!("Deleted pod {}", pod.name()));
            outcome.requeue_after = Some(config.poll_interval);
        }
        (PodEffect::AcknowledgeDeleted, Some(pod)) => {
            handle_pod_deleted(client, devbox, &pod).await?;
            outcome.requeue_after = Some(config.poll_interval);
        }
        (PodEffect::Keep, Some(pod)) => update_actual(devbox, &pod),
        (PodEffect::Nothing, _) => {}
        (effect, None) => {
            return Err(ControllerError::internal_error(format!(
                "{:?} requested without an observed pod",
                effect
            )));
        }
    }

    Ok(outcome)
}
