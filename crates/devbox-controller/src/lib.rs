// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod commit;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod events;
pub mod filter;
pub mod lock;
pub mod matcher;
pub mod mock;
pub mod phase;
pub mod pod;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod ssh;
pub mod sync;
pub mod traits;

// Re-export primary types
pub use error::{ControllerError, Result};
pub use mock::MockCluster;
pub use traits::ClusterClient;

// Re-export reconcilers and their runtime
pub use api_client::ApiClient;
pub use config::ControllerConfig;
pub use controller::DevboxReconciler;
pub use daemon::DaemonCommitter;
pub use events::{EventRecorder, EventType};
pub use filter::RestartWindowFilter;
pub use lock::{LockGuard, LockTable};
pub use matcher::{default_matchers, PodMatcher};
pub use phase::{derive_phase, transition, PodEffect, PodFacts, PodPhase, Transition};
pub use pod::desired_pod;
pub use queue::WorkQueue;
pub use runner::{Action, Reconciler, Runner};
pub use sync::{desired_service, sync_pod, sync_secret, sync_service, PodSyncOutcome};
