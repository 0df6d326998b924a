use crate::error::{ignore_not_found, ControllerError, Result};
use crate::retry::retry_on_not_found;
use crate::sync::owned_metadata;
use crate::traits::ClusterClient;
use devbox_core::labels::service_name;
use devbox_core::{recommended_labels, Devbox, NetworkStatus, NetworkType};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info};

pub const DEFAULT_SSH_PORT_NAME: &str = "devbox-ssh-port";
pub const DEFAULT_SSH_PORT: i32 = 22;

fn service_port(name: Option<String>, port: i32, protocol: Option<String>) -> ServicePort {
    ServicePort {
        name,
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some(protocol.unwrap_or_else(|| "TCP".to_string())),
        ..Default::default()
    }
}

/// One Service port per declared container port, or SSH on 22 when none are declared
fn desired_ports(devbox: &Devbox) -> Vec<ServicePort> {
    let ports: Vec<ServicePort> = devbox
        .spec
        .config
        .ports
        .iter()
        .map(|p| service_port(p.name.clone(), p.container_port, p.protocol.clone()))
        .collect();

    if ports.is_empty() {
        vec![service_port(
            Some(DEFAULT_SSH_PORT_NAME.to_string()),
            DEFAULT_SSH_PORT,
            None,
        )]
    } else {
        ports
    }
}

pub fn desired_service(devbox: &Devbox) -> Service {
    Service {
        metadata: owned_metadata(devbox, &service_name(devbox.name())),
        spec: Some(ServiceSpec {
            selector: Some(recommended_labels(devbox.name())),
            type_: Some("NodePort".to_string()),
            ports: Some(desired_ports(devbox)),
            ..Default::default()
        }),
        status: None,
    }
}

/// Apply the fields this controller owns onto `existing`, keeping allocated NodePorts
fn merge_service(existing: &Service, desired: &Service) -> Service {
    let mut merged = existing.clone();

    let labels = merged.metadata.labels.get_or_insert_with(Default::default);
    for (k, v) in desired.metadata.labels.iter().flatten() {
        labels.insert(k.clone(), v.clone());
    }

    let has_controller = merged
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|r| r.controller == Some(true));
    if !has_controller {
        merged
            .metadata
            .owner_references
            .get_or_insert_with(Vec::new)
            .extend(desired.metadata.owner_references.iter().flatten().cloned());
    }

    let Some(want) = desired.spec.as_ref() else {
        return merged;
    };
    let spec = merged.spec.get_or_insert_with(Default::default);
    let allocated: Vec<Option<i32>> = spec
        .ports
        .iter()
        .flatten()
        .map(|p| p.node_port.filter(|n| *n != 0))
        .collect();

    spec.selector = want.selector.clone();
    spec.type_ = want.type_.clone();
    spec.ports = want.ports.clone().map(|ports| {
        ports
            .into_iter()
            .enumerate()
            .map(|(i, mut port)| {
                port.node_port = allocated.get(i).copied().flatten();
                port
            })
            .collect()
    });

    merged
}

/// Keep the NodePort Service in line with the Devbox phase.
///
/// Reachable phases get a Service and the allocated NodePort is written to
/// `status.network`; every other phase removes the Service and zeroes the port.
pub async fn sync_service(client: &dyn ClusterClient, devbox: &mut Devbox) -> Result<()> {
    let namespace = devbox.namespace().to_string();
    let name = service_name(devbox.name());

    if !devbox.status.phase.is_reachable() {
        ignore_not_found(client.delete_service(&namespace, &name).await)?;
        devbox.status.network = NetworkStatus {
            network_type: NetworkType::NodePort,
            node_port: 0,
        };
        return Ok(());
    }

    let desired = desired_service(devbox);
    match client.get_service(&namespace, &name).await {
        Ok(existing) => {
            let merged = merge_service(&existing, &desired);
            if merged != existing {
                info!(devbox = %devbox.key(), service = %name, "Updating devbox service");
                client.update_service(&merged).await?;
            } else {
                debug!(devbox = %devbox.key(), service = %name, "Service up to date");
            }
        }
        Err(e) if e.is_not_found() => {
            info!(devbox = %devbox.key(), service = %name, "Creating devbox service");
            client.create_service(&desired).await?;
        }
        Err(e) => return Err(e),
    }

    let service = retry_on_not_found("get devbox service", || {
        client.get_service(&namespace, &name)
    })
    .await?;

    let node_port = service
        .spec
        .iter()
        .flat_map(|s| s.ports.iter().flatten())
        .filter_map(|p| p.node_port)
        .find(|p| *p != 0)
        .ok_or_else(|| ControllerError::node_port_not_allocated(&name))?;

    devbox.status.network = NetworkStatus {
        network_type: NetworkType::NodePort,
        node_port,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use devbox_core::{DevboxPhase, DevboxSpec};
    use k8s_openapi::api::core::v1::ContainerPort;

    async fn running_devbox(cluster: &MockCluster, ports: Vec<ContainerPort>) -> Devbox {
        let mut devbox = Devbox::new(
            "ns-a",
            "box",
            DevboxSpec {
                image: "busybox".to_string(),
                ..Default::default()
            },
        );
        devbox.spec.config.ports = ports;
        let mut devbox = cluster.insert_devbox(devbox).await;
        devbox.status.phase = DevboxPhase::Running;
        devbox
    }

    fn http_port() -> ContainerPort {
        ContainerPort {
            name: Some("http".to_string()),
            container_port: 8080,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_running_devbox_gets_node_port_service() {
        let cluster = MockCluster::new();
        let mut devbox = running_devbox(&cluster, vec![http_port()]).await;

        sync_service(&cluster, &mut devbox).await.unwrap();

        let service = cluster.get_service("ns-a", "box-svc").await.unwrap();
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("http"));
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));

        assert_ne!(devbox.status.network.node_port, 0);
        assert_eq!(Some(devbox.status.network.node_port), ports[0].node_port);
    }

    #[tokio::test]
    async fn test_default_ssh_port() {
        let cluster = MockCluster::new();
        let devbox = running_devbox(&cluster, vec![]).await;
        let ports = desired_service(&devbox).spec.unwrap().ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some(DEFAULT_SSH_PORT_NAME));
        assert_eq!(ports[0].port, 22);
    }

    #[tokio::test]
    async fn test_second_sync_writes_nothing() {
        let cluster = MockCluster::new();
        let mut devbox = running_devbox(&cluster, vec![http_port()]).await;

        sync_service(&cluster, &mut devbox).await.unwrap();
        let node_port = devbox.status.network.node_port;
        let writes = cluster.writes("Service").await;

        sync_service(&cluster, &mut devbox).await.unwrap();
        assert_eq!(cluster.writes("Service").await, writes);
        assert_eq!(devbox.status.network.node_port, node_port);
    }

    #[tokio::test]
    async fn test_port_change_keeps_node_port() {
        let cluster = MockCluster::new();
        let mut devbox = running_devbox(&cluster, vec![http_port()]).await;
        sync_service(&cluster, &mut devbox).await.unwrap();
        let node_port = devbox.status.network.node_port;

        devbox.spec.config.ports[0].container_port = 9090;
        sync_service(&cluster, &mut devbox).await.unwrap();

        let service = cluster.get_service("ns-a", "box-svc").await.unwrap();
        let port = &service.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 9090);
        assert_eq!(port.node_port, Some(node_port));
    }

    #[tokio::test]
    async fn test_missing_node_port_is_fatal() {
        let cluster = MockCluster::new();
        cluster.set_node_port_allocation(false).await;
        let mut devbox = running_devbox(&cluster, vec![http_port()]).await;

        let err = sync_service(&cluster, &mut devbox).await.unwrap_err();
        assert!(matches!(err, ControllerError::NodePortNotAllocated { .. }));
    }

    #[tokio::test]
    async fn test_stopped_devbox_loses_service() {
        let cluster = MockCluster::new();
        let mut devbox = running_devbox(&cluster, vec![http_port()]).await;
        sync_service(&cluster, &mut devbox).await.unwrap();

        devbox.status.phase = DevboxPhase::Stopped;
        sync_service(&cluster, &mut devbox).await.unwrap();
        assert!(cluster.services("ns-a").await.is_empty());
        assert_eq!(devbox.status.network.node_port, 0);

        // Already gone: still fine
        sync_service(&cluster, &mut devbox).await.unwrap();
    }
}
