//! Commit history ledger.
//!
//! One entry per Pod creation attempt. Entries are appended, never removed or
//! re-keyed; only `predicated_status` and `status` change. `status` moves at
//! most once, from Pending to Success or Failed: when a live Pod reports a
//! settled container state, or at the latest when the Pod is gone.

use chrono::Utc;
use devbox_core::labels::{pod_name, random_suffix};
use devbox_core::{CommitHistory, CommitStatus, Devbox};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Waiting reasons that mean the image or container can never start
const FAILED_WAITING_REASONS: [&str; 6] = [
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "ErrImageNeverPull",
    "CreateContainerConfigError",
    "CreateContainerError",
];

/// `<registry>/<namespace>/<name>:<5 random chars>-<YYYY-MM-DD-HHMMSS>`
pub fn generate_image_name(registry: &str, devbox: &Devbox) -> String {
    format!(
        "{}/{}/{}:{}-{}",
        registry,
        devbox.namespace(),
        devbox.name(),
        random_suffix(5),
        Utc::now().format("%Y-%m-%d-%H%M%S")
    )
}

/// Entry for the next Pod attempt; both statuses start Pending
pub fn next_commit_history(registry: &str, devbox: &Devbox) -> CommitHistory {
    CommitHistory {
        image: generate_image_name(registry, devbox),
        time: Time(Utc::now()),
        pod: pod_name(devbox.name()),
        status: CommitStatus::Pending,
        predicated_status: CommitStatus::Pending,
    }
}

/// Best-effort outcome inferred from the first container's state
pub fn predicted_status(pod: &Pod) -> CommitStatus {
    let Some(state) = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|c| c.first())
        .and_then(|c| c.state.as_ref())
    else {
        return CommitStatus::Pending;
    };

    if state.running.is_some() || state.terminated.is_some() {
        return CommitStatus::Success;
    }

    let failed = state
        .waiting
        .as_ref()
        .and_then(|w| w.reason.as_deref())
        .is_some_and(|reason| FAILED_WAITING_REASONS.contains(&reason));
    if failed {
        CommitStatus::Failed
    } else {
        CommitStatus::Pending
    }
}

fn entry_for<'a>(devbox: &'a mut Devbox, pod: &Pod) -> Option<&'a mut CommitHistory> {
    let name = pod.metadata.name.as_deref()?;
    devbox
        .status
        .commit_history
        .iter_mut()
        .rev()
        .find(|h| h.pod == name)
}

/// Refresh the predicted status of the entry belonging to `pod`
pub fn update_predicted(devbox: &mut Devbox, pod: &Pod) {
    let predicted = predicted_status(pod);
    if let Some(entry) = entry_for(devbox, pod) {
        entry.predicated_status = predicted;
    }
}

/// Settle the actual status of `pod`'s entry from the live Pod.
///
/// Only a Pending status moves, and only once the container state says
/// something definite; a Pod still starting leaves the entry alone.
pub fn update_actual(devbox: &mut Devbox, pod: &Pod) {
    let observed = predicted_status(pod);
    if observed == CommitStatus::Pending {
        return;
    }
    if let Some(entry) = entry_for(devbox, pod) {
        if entry.status == CommitStatus::Pending {
            entry.status = observed;
        }
    }
}

/// Settle the actual status of `pod`'s entry once the Pod is gone.
///
/// A Pending status takes the predicted value; a prediction that is still
/// Pending means the Pod never got far enough to commit, so it fails.
pub fn finalize(devbox: &mut Devbox, pod: &Pod) {
    let Some(entry) = entry_for(devbox, pod) else {
        return;
    };
    if entry.status != CommitStatus::Pending {
        return;
    }
    entry.status = match entry.predicated_status {
        CommitStatus::Pending => CommitStatus::Failed,
        settled => settled,
    };
}

/// Image of the most recent successful commit
pub fn last_success_image(devbox: &Devbox) -> Option<&str> {
    devbox
        .status
        .commit_history
        .iter()
        .rev()
        .find(|h| h.status == CommitStatus::Success)
        .map(|h| h.image.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbox_core::DevboxSpec;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn devbox() -> Devbox {
        Devbox::new(
            "ns-a",
            "box",
            DevboxSpec {
                image: "busybox".to_string(),
                ..Default::default()
            },
        )
    }

    fn pod(name: &str, state: Option<ContainerState>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: state.map(|s| {
                    vec![ContainerStatus {
                        name: "box".to_string(),
                        state: Some(s),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running() -> ContainerState {
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    }

    fn waiting(reason: &str) -> ContainerState {
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_next_commit_history_shape() {
        let entry = next_commit_history("reg.local", &devbox());
        assert!(entry.image.starts_with("reg.local/ns-a/box:"));
        let tag = entry.image.rsplit(':').next().unwrap();
        assert_eq!(tag.len(), 5 + 1 + "2024-01-01-000000".len());
        assert!(entry.pod.starts_with("box-"));
        assert_eq!(entry.status, CommitStatus::Pending);
        assert_eq!(entry.predicated_status, CommitStatus::Pending);
    }

    #[test]
    fn test_predicted_status() {
        assert_eq!(predicted_status(&pod("p", Some(running()))), CommitStatus::Success);
        assert_eq!(
            predicted_status(&pod("p", Some(waiting("ImagePullBackOff")))),
            CommitStatus::Failed
        );
        assert_eq!(
            predicted_status(&pod("p", Some(waiting("ContainerCreating")))),
            CommitStatus::Pending
        );
        assert_eq!(predicted_status(&pod("p", None)), CommitStatus::Pending);
    }

    #[test]
    fn test_finalize_only_moves_pending() {
        let mut devbox = devbox();
        let mut entry = next_commit_history("reg", &devbox);
        entry.pod = "box-aaaaa".to_string();
        devbox.status.commit_history.push(entry);

        let live = pod("box-aaaaa", Some(running()));
        update_predicted(&mut devbox, &live);
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Pending);

        finalize(&mut devbox, &live);
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Success);

        // A later failing observation must not regress the settled status
        let broken = pod("box-aaaaa", Some(waiting("ErrImagePull")));
        update_predicted(&mut devbox, &broken);
        finalize(&mut devbox, &broken);
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Success);
        assert_eq!(
            devbox.status.commit_history[0].predicated_status,
            CommitStatus::Failed
        );
    }

    #[test]
    fn test_update_actual_settles_once() {
        let mut devbox = devbox();
        let mut entry = next_commit_history("reg", &devbox);
        entry.pod = "box-ccccc".to_string();
        devbox.status.commit_history.push(entry);

        update_actual(&mut devbox, &pod("box-ccccc", Some(waiting("ContainerCreating"))));
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Pending);

        update_actual(&mut devbox, &pod("box-ccccc", Some(running())));
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Success);

        update_actual(&mut devbox, &pod("box-ccccc", Some(waiting("ErrImagePull"))));
        finalize(&mut devbox, &pod("box-ccccc", None));
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Success);
    }

    #[test]
    fn test_update_actual_ignores_other_pods() {
        let mut devbox = devbox();
        let mut entry = next_commit_history("reg", &devbox);
        entry.pod = "box-ddddd".to_string();
        devbox.status.commit_history.push(entry);

        update_actual(&mut devbox, &pod("box-eeeee", Some(running())));
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Pending);
    }

    #[test]
    fn test_finalize_without_prediction_fails() {
        let mut devbox = devbox();
        let mut entry = next_commit_history("reg", &devbox);
        entry.pod = "box-bbbbb".to_string();
        devbox.status.commit_history.push(entry);

        finalize(&mut devbox, &pod("box-bbbbb", None));
        assert_eq!(devbox.status.commit_history[0].status, CommitStatus::Failed);
    }

    #[test]
    fn test_last_success_image() {
        let mut devbox = devbox();
        assert_eq!(last_success_image(&devbox), None);

        for (image, status) in [
            ("img:1", CommitStatus::Success),
            ("img:2", CommitStatus::Success),
            ("img:3", CommitStatus::Failed),
        ] {
            let mut entry = next_commit_history("reg", &devbox);
            entry.image = image.to_string();
            entry.status = status;
            devbox.status.commit_history.push(entry);
        }
        assert_eq!(last_success_image(&devbox), Some("img:2"));
    }
}
