use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::time::Duration;

/// Suppresses create events for objects that predate controller startup.
///
/// After a restart every existing Devbox shows up as "new"; only those
/// created within `window` of startup are reconciled immediately, the rest
/// wait for their first change or the periodic resync.
#[derive(Debug, Clone, Copy)]
pub struct RestartWindowFilter {
    cutoff: DateTime<Utc>,
}

impl RestartWindowFilter {
    pub fn new(window: Duration) -> Self {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        Self::with_cutoff(Utc::now() - window)
    }

    pub fn with_cutoff(cutoff: DateTime<Utc>) -> Self {
        Self { cutoff }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// An object without a creation timestamp is treated as infinitely old
    pub fn admits_create(&self, created: Option<&Time>) -> bool {
        created.is_some_and(|t| t.0 > self.cutoff)
    }
}
