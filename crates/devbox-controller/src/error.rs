use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for reconciliation and cluster API operations
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Object not found
    #[error("{kind} not found: {key}")]
    #[diagnostic(
        code(devbox::controller::not_found),
        help("The object may have been deleted concurrently; the next reconcile re-reads it")
    )]
    NotFound {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
    },

    /// Object already exists
    #[error("{kind} already exists: {key}")]
    #[diagnostic(
        code(devbox::controller::already_exists),
        help("Another writer created the object first; re-read it instead of creating")
    )]
    AlreadyExists {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
    },

    /// Optimistic concurrency conflict
    #[error("Conflict updating {kind} {key}: the object has been modified")]
    #[diagnostic(
        code(devbox::controller::conflict),
        help("Re-read the latest version of the object and retry the update")
    )]
    Conflict {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
    },

    /// Resource quota rejected a create
    #[error("Exceeded quota creating {kind} {key}: {message}")]
    #[diagnostic(
        code(devbox::controller::quota_exceeded),
        help("Raise the namespace ResourceQuota or stop other devboxes; creation is retried later")
    )]
    QuotaExceeded {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
        #[allow(unused)]
        message: String,
    },

    /// The API server answered with an unexpected status
    #[error("{operation} failed with status {status}: {message}")]
    #[diagnostic(
        code(devbox::controller::api_error),
        help("Check the API server logs and the controller's RBAC permissions")
    )]
    ApiError {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// Transport-level HTTP failure
    #[error("HTTP request failed: {message}")]
    #[diagnostic(
        code(devbox::controller::http_error),
        help("Verify the API server URL is reachable from the controller")
    )]
    HttpError {
        #[allow(unused)]
        message: String,
    },

    /// The Service exists but no NodePort was allocated
    #[error("NodePort not found for service {service}")]
    #[diagnostic(
        code(devbox::controller::node_port_not_allocated),
        help("The API server did not allocate a NodePort; check the service-node-port-range and port exhaustion")
    )]
    NodePortNotAllocated {
        #[allow(unused)]
        service: String,
    },

    /// More than one Pod carries the Devbox's labels
    #[error("Found {count} pods for devbox {devbox}, expected at most one")]
    #[diagnostic(
        code(devbox::controller::too_many_pods),
        help("The extra pods have been force-deleted; the next reconcile recreates a single pod")
    )]
    TooManyPods {
        #[allow(unused)]
        devbox: String,
        #[allow(unused)]
        count: usize,
    },

    /// A Pod exists but reports no container status
    #[error("Pod {pod} has no container statuses")]
    #[diagnostic(
        code(devbox::controller::pod_not_started),
        help("The pod has not started any container yet; the reconcile is retried with backoff")
    )]
    PodNotStarted {
        #[allow(unused)]
        pod: String,
    },

    /// Phase value the controller cannot act on
    #[error("Unknown devbox phase: {phase}")]
    #[diagnostic(
        code(devbox::controller::unknown_phase),
        help("Reset status.phase to a supported value such as Stopped or Running")
    )]
    UnknownPhase {
        #[allow(unused)]
        phase: String,
    },

    /// SSH key pair generation failed
    #[error("Failed to generate SSH key pair: {message}")]
    #[diagnostic(
        code(devbox::controller::key_generation_failed),
        help("This indicates a problem with the system random number generator")
    )]
    KeyGeneration {
        #[allow(unused)]
        message: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] devbox_core::DevboxError),

    /// Internal error
    #[error("Internal controller error: {message}")]
    #[diagnostic(
        code(devbox::controller::internal_error),
        help("This is likely a bug in devbox-controller. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn conflict(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn quota_exceeded(
        kind: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QuotaExceeded {
            kind: kind.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn api_error(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            operation: operation.into(),
            status,
            message: message.into(),
        }
    }

    pub fn http_error(message: impl Into<String>) -> Self {
        Self::HttpError {
            message: message.into(),
        }
    }

    pub fn node_port_not_allocated(service: impl Into<String>) -> Self {
        Self::NodePortNotAllocated {
            service: service.into(),
        }
    }

    pub fn too_many_pods(devbox: impl Into<String>, count: usize) -> Self {
        Self::TooManyPods {
            devbox: devbox.into(),
            count,
        }
    }

    pub fn pod_not_started(pod: impl Into<String>) -> Self {
        Self::PodNotStarted { pod: pod.into() }
    }

    pub fn unknown_phase(phase: impl Into<String>) -> Self {
        Self::UnknownPhase {
            phase: phase.into(),
        }
    }

    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::KeyGeneration {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// Treat NotFound as success, the way deletes of absent objects should be
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(ControllerError::not_found("Pod", "ns/a").is_not_found());
        assert!(ControllerError::conflict("Devbox", "ns/a").is_conflict());
        assert!(ControllerError::quota_exceeded("Pod", "ns/a", "exceeded quota").is_quota_exceeded());
        assert!(!ControllerError::internal_error("x").is_not_found());
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(ControllerError::not_found("Service", "ns/a"))).is_ok());
        assert!(ignore_not_found(Err(ControllerError::conflict("Service", "ns/a"))).is_err());
    }
}
