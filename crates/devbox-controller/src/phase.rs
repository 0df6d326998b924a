//! Devbox phase engine.
//!
//! Pure functions only: the pod synchronizer gathers observed facts into a
//! [`PodFacts`] value, asks [`transition`] what to do, and performs the
//! returned [`PodEffect`] itself. Nothing here touches the cluster.

use crate::error::{ControllerError, Result};
use devbox_core::{DevboxAction, DevboxPhase};
use k8s_openapi::api::core::v1::Pod;

/// Coarse Pod phase as reported by the kubelet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn of(pod: &Pod) -> Self {
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// What the engine needs to know about the single observed Pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodFacts {
    pub name: String,
    /// Deletion timestamp is set
    pub terminating: bool,
    /// At least one container status is reported
    pub container_started: bool,
    /// Every pod matcher accepted the Pod
    pub matches_desired: bool,
    pub pod_phase: PodPhase,
}

/// Side effect the pod synchronizer must perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodEffect {
    Nothing,
    /// Build the desired Pod, create it and append a commit history entry
    Create,
    /// Pod is healthy and current; refresh commit status from it
    Keep,
    /// Strip the finalizer, delete with zero grace, finalize the history entry
    Delete,
    /// Pod is already terminating; strip the finalizer and finalize its entry
    AcknowledgeDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// `None` leaves the phase unchanged
    pub next_phase: Option<DevboxPhase>,
    pub effect: PodEffect,
}

impl Transition {
    fn stay(effect: PodEffect) -> Self {
        Self {
            next_phase: None,
            effect,
        }
    }

    fn advance(phase: DevboxPhase) -> Self {
        Self {
            next_phase: Some(phase),
            effect: PodEffect::Nothing,
        }
    }
}

/// Phase requested by the user's action, if it applies from `current`
pub fn derive_phase(action: DevboxAction, current: DevboxPhase) -> Option<DevboxPhase> {
    use DevboxAction as A;
    use DevboxPhase as P;

    let next = match (action, current) {
        (A::Start, P::Stopped | P::AdvancedStopped | P::Pending) => P::Running,
        (A::Stop, P::Running | P::AdvancedStopped) => P::Releasing,
        (A::Restart, P::Running) => P::Restarting,
        (A::AdvancedStop, P::Running) => P::AdvancedStopping,
        (A::Shutdown, P::Running | P::AdvancedStopped) => P::Shutdown,
        (A::Shutdown, P::Pending) => P::Stopped,
        _ => return None,
    };
    Some(next)
}

/// Quiescent phase reached once the Pod is confirmed gone
fn settle(phase: DevboxPhase) -> Option<DevboxPhase> {
    match phase {
        DevboxPhase::Releasing => Some(DevboxPhase::Committing),
        DevboxPhase::Restarting => Some(DevboxPhase::Running),
        DevboxPhase::AdvancedStopping => Some(DevboxPhase::AdvancedStopped),
        DevboxPhase::Shutdown => Some(DevboxPhase::ShutdownCommitting),
        _ => None,
    }
}

/// Next phase and Pod side effect for `phase` given at most one observed Pod
pub fn transition(phase: DevboxPhase, pod: Option<&PodFacts>) -> Result<Transition> {
    match phase {
        DevboxPhase::Pending => Ok(Transition::stay(PodEffect::Nothing)),

        DevboxPhase::Running => {
            let Some(pod) = pod else {
                return Ok(Transition::stay(PodEffect::Create));
            };
            if !pod.container_started {
                return Err(ControllerError::pod_not_started(&pod.name));
            }
            if pod.terminating {
                return Ok(Transition::stay(PodEffect::AcknowledgeDeleted));
            }

            let effect = match (pod.matches_desired, pod.pod_phase) {
                (true, PodPhase::Pending | PodPhase::Running | PodPhase::Unknown) => {
                    PodEffect::Keep
                }
                _ => PodEffect::Delete,
            };
            Ok(Transition::stay(effect))
        }

        p if p.is_quiescent() => match pod {
            None => Ok(settle(p).map_or(Transition::stay(PodEffect::Nothing), Transition::advance)),
            Some(pod) if pod.terminating => Ok(Transition::stay(PodEffect::AcknowledgeDeleted)),
            Some(_) => Ok(Transition::stay(PodEffect::Delete)),
        },

        other => Err(ControllerError::unknown_phase(other.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(matches: bool, phase: PodPhase) -> PodFacts {
        PodFacts {
            name: "box-abcde".to_string(),
            terminating: false,
            container_started: true,
            matches_desired: matches,
            pod_phase: phase,
        }
    }

    #[test]
    fn test_running_without_pod_creates() {
        let t = transition(DevboxPhase::Running, None).unwrap();
        assert_eq!(t.effect, PodEffect::Create);
        assert_eq!(t.next_phase, None);
    }

    #[test]
    fn test_running_with_healthy_pod_keeps() {
        let t = transition(DevboxPhase::Running, Some(&facts(true, PodPhase::Running))).unwrap();
        assert_eq!(t, Transition::stay(PodEffect::Keep));
    }

    #[test]
    fn test_running_with_failed_or_stale_pod_deletes() {
        let failed = transition(DevboxPhase::Running, Some(&facts(true, PodPhase::Failed))).unwrap();
        assert_eq!(failed.effect, PodEffect::Delete);

        let succeeded =
            transition(DevboxPhase::Running, Some(&facts(true, PodPhase::Succeeded))).unwrap();
        assert_eq!(succeeded.effect, PodEffect::Delete);

        let stale = transition(DevboxPhase::Running, Some(&facts(false, PodPhase::Running))).unwrap();
        assert_eq!(stale.effect, PodEffect::Delete);
    }

    #[test]
    fn test_running_with_unstarted_pod_fails() {
        let mut pod = facts(true, PodPhase::Pending);
        pod.container_started = false;
        let err = transition(DevboxPhase::Running, Some(&pod)).unwrap_err();
        assert!(matches!(err, ControllerError::PodNotStarted { .. }));
    }

    #[test]
    fn test_terminating_pod_is_acknowledged() {
        let mut pod = facts(true, PodPhase::Running);
        pod.terminating = true;
        for phase in [DevboxPhase::Running, DevboxPhase::Stopped, DevboxPhase::Releasing] {
            let t = transition(phase, Some(&pod)).unwrap();
            assert_eq!(t, Transition::stay(PodEffect::AcknowledgeDeleted));
        }
    }

    #[test]
    fn test_quiescent_phases_settle_without_pod() {
        let cases = [
            (DevboxPhase::Releasing, Some(DevboxPhase::Committing)),
            (DevboxPhase::Restarting, Some(DevboxPhase::Running)),
            (DevboxPhase::AdvancedStopping, Some(DevboxPhase::AdvancedStopped)),
            (DevboxPhase::Shutdown, Some(DevboxPhase::ShutdownCommitting)),
            (DevboxPhase::Committing, None),
            (DevboxPhase::ShutdownCommitting, None),
            (DevboxPhase::Stopped, None),
            (DevboxPhase::AdvancedStopped, None),
        ];
        for (phase, expected) in cases {
            let t = transition(phase, None).unwrap();
            assert_eq!(t.next_phase, expected, "phase {}", phase);
            assert_eq!(t.effect, PodEffect::Nothing);
        }
    }

    #[test]
    fn test_quiescent_phases_delete_any_pod() {
        let t = transition(DevboxPhase::Releasing, Some(&facts(true, PodPhase::Running))).unwrap();
        assert_eq!(t, Transition::stay(PodEffect::Delete));
    }

    #[test]
    fn test_pending_is_noop() {
        let t = transition(DevboxPhase::Pending, Some(&facts(false, PodPhase::Failed))).unwrap();
        assert_eq!(t, Transition::stay(PodEffect::Nothing));
    }

    #[test]
    fn test_unrecognized_phases_fail() {
        assert!(transition(DevboxPhase::Error, None).is_err());
        assert!(transition(DevboxPhase::Unknown, None).is_err());
    }

    #[test]
    fn test_derive_phase() {
        assert_eq!(
            derive_phase(DevboxAction::Start, DevboxPhase::Stopped),
            Some(DevboxPhase::Running)
        );
        assert_eq!(
            derive_phase(DevboxAction::Stop, DevboxPhase::Running),
            Some(DevboxPhase::Releasing)
        );
        assert_eq!(
            derive_phase(DevboxAction::Restart, DevboxPhase::Running),
            Some(DevboxPhase::Restarting)
        );
        assert_eq!(
            derive_phase(DevboxAction::Shutdown, DevboxPhase::Pending),
            Some(DevboxPhase::Stopped)
        );
        assert_eq!(derive_phase(DevboxAction::Start, DevboxPhase::Running), None);
        assert_eq!(derive_phase(DevboxAction::None, DevboxPhase::Stopped), None);
        assert_eq!(derive_phase(DevboxAction::Restart, DevboxPhase::Stopped), None);
    }
}
