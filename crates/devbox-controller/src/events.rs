use crate::traits::ClusterClient;
use chrono::Utc;
use devbox_core::Devbox;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Kubernetes event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

/// Publishes events against a Devbox. Failures are logged, never returned.
#[derive(Clone)]
pub struct EventRecorder {
    client: Arc<dyn ClusterClient>,
    component: String,
}

impl EventRecorder {
    pub fn new(client: Arc<dyn ClusterClient>, component: impl Into<String>) -> Self {
        Self {
            client,
            component: component.into(),
        }
    }

    pub async fn normal(&self, devbox: &Devbox, reason: &str, message: impl Into<String>) {
        self.record(devbox, EventType::Normal, reason, message.into())
            .await
    }

    pub async fn warning(&self, devbox: &Devbox, reason: &str, message: impl Into<String>) {
        self.record(devbox, EventType::Warning, reason, message.into())
            .await
    }

    async fn record(&self, devbox: &Devbox, type_: EventType, reason: &str, message: String) {
        let event = self.build(devbox, type_, reason, message);
        match self.client.create_event(&event).await {
            Ok(()) => debug!(devbox = %devbox.key(), %type_, reason, "Recorded event"),
            Err(e) => warn!(devbox = %devbox.key(), reason, error = %e, "Failed to record event"),
        }
    }

    fn build(&self, devbox: &Devbox, type_: EventType, reason: &str, message: String) -> Event {
        let gvk = Devbox::gvk();
        let now = Time(Utc::now());
        Event {
            metadata: ObjectMeta {
                name: Some(format!("{}.{}", devbox.name(), Uuid::new_v4().simple())),
                namespace: Some(devbox.namespace().to_string()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(gvk.api_version()),
                kind: Some(gvk.kind.clone()),
                name: Some(devbox.name().to_string()),
                namespace: Some(devbox.namespace().to_string()),
                uid: devbox.metadata.uid.clone(),
                resource_version: devbox.metadata.resource_version.clone(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message),
            type_: Some(type_.to_string()),
            source: Some(EventSource {
                component: Some(self.component.clone()),
                host: None,
            }),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use devbox_core::DevboxSpec;

    #[tokio::test]
    async fn test_events_reference_the_devbox() {
        let cluster = MockCluster::new();
        let devbox = cluster
            .insert_devbox(Devbox::new("ns-a", "box", DevboxSpec::default()))
            .await;
        let recorder = EventRecorder::new(Arc::new(cluster.clone()), "devbox-controller");

        recorder.normal(&devbox, "Created", "created pod").await;
        recorder.warning(&devbox, "Failed", "quota exceeded").await;

        let events = cluster.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].type_.as_deref(), Some("Normal"));
        assert_eq!(events[1].type_.as_deref(), Some("Warning"));
        assert_eq!(events[1].message.as_deref(), Some("quota exceeded"));
        assert_eq!(events[0].involved_object.uid, devbox.metadata.uid);
        assert_eq!(events[0].involved_object.kind.as_deref(), Some("Devbox"));
        assert_ne!(events[0].metadata.name, events[1].metadata.name);
    }
}
