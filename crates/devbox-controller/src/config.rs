use std::time::Duration;

/// Tunables shared by the reconcilers and the runner
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Registry prefix for committed images (`<registry>/<ns>/<name>:<tag>`)
    pub commit_image_registry: String,
    /// Requests are limits divided by these rates
    pub cpu_request_rate: f64,
    pub memory_request_rate: f64,
    pub ephemeral_storage_request: String,
    pub ephemeral_storage_limit: String,
    /// Always start pods from `spec.image`, ignoring commit history
    pub debug_mode: bool,
    /// Create events for objects older than this (relative to startup) are ignored
    pub restart_predicate_window: Duration,
    pub max_concurrent_reconciles: usize,
    pub lock_retry_delay: Duration,
    pub quota_retry_delay: Duration,
    pub poll_interval: Duration,
    pub resync_interval: Duration,
    pub idle_lock_ttl: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            commit_image_registry: "sealos.hub:5000".to_string(),
            cpu_request_rate: 10.0,
            memory_request_rate: 10.0,
            ephemeral_storage_request: "500Mi".to_string(),
            ephemeral_storage_limit: "10Gi".to_string(),
            debug_mode: false,
            restart_predicate_window: Duration::from_secs(60),
            max_concurrent_reconciles: 10,
            lock_retry_delay: Duration::from_secs(5),
            quota_retry_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            resync_interval: Duration::from_secs(30),
            idle_lock_ttl: Duration::from_secs(600),
        }
    }
}
