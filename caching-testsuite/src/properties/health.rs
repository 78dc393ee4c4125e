use crate::{
    app::SQUID_PORT,
    ensure_that,
    error::{HarnessError, Result},
    probe::{
        wait_for, ClusterProbe, ContainerSummary, DeploymentSummary, PodSummary, PollOptions,
        ServiceSummary, TargetPort,
    },
    settings::{DEFAULT_DEPLOYMENT_NAME, DEFAULT_NAMESPACE, DEFAULT_SERVICE_NAME},
};

/// What a healthy Squid release looks like in the cluster.
#[derive(Debug, Clone)]
pub struct SquidExpectations {
    pub namespace: String,
    pub deployment_name: String,
    pub service_name: String,
    /// Matches the proxy pods only, not the test or mirrord target pods.
    pub pod_selector: String,
    pub name_label: (String, String),
    pub container_name: String,
    pub image_substring: String,
    pub port: i32,
    pub port_name: String,
    pub config_map_name: String,
    pub config_key: String,
    pub config_substrings: Vec<String>,
    pub config_mount_name: String,
    pub config_mount_path: String,
    pub poll: PollOptions,
}

impl Default for SquidExpectations {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            deployment_name: DEFAULT_DEPLOYMENT_NAME.to_owned(),
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            pod_selector: "app.kubernetes.io/name=squid,app.kubernetes.io/component notin (test,mirrord-target)"
                .to_owned(),
            name_label: ("app.kubernetes.io/name".to_owned(), "squid".to_owned()),
            container_name: "squid".to_owned(),
            image_substring: "konflux-ci/squid".to_owned(),
            port: i32::from(SQUID_PORT),
            port_name: "http".to_owned(),
            config_map_name: "squid-config".to_owned(),
            config_key: "squid.conf".to_owned(),
            config_substrings: vec!["http_port 3128".to_owned(), "acl localnet src".to_owned()],
            config_mount_name: "squid-config".to_owned(),
            config_mount_path: "/etc/squid/squid.conf".to_owned(),
            poll: PollOptions::default(),
        }
    }
}

impl SquidExpectations {
    fn has_name_label(&self, labels: &std::collections::BTreeMap<String, String>) -> bool {
        let (key, value) = &self.name_label;
        labels.get(key) == Some(value)
    }
}

pub async fn check_namespace_active(probe: &dyn ClusterProbe, expect: &SquidExpectations) -> Result<()> {
    let namespace = probe.get_namespace(&expect.namespace).await?;
    ensure_that!(
        namespace.name == expect.namespace,
        "Expected namespace {}, got {}",
        expect.namespace,
        namespace.name
    );
    ensure_that!(
        namespace.phase.as_deref() == Some("Active"),
        "Namespace {} should be Active, phase is {:?}",
        namespace.name,
        namespace.phase
    );
    Ok(())
}

pub async fn check_deployment_configured(
    probe: &dyn ClusterProbe,
    expect: &SquidExpectations,
) -> Result<()> {
    let deployment = probe
        .get_deployment(&expect.namespace, &expect.deployment_name)
        .await?;

    ensure_that!(
        deployment.name == expect.deployment_name && deployment.namespace == expect.namespace,
        "Unexpected deployment {}/{}",
        deployment.namespace,
        deployment.name
    );
    ensure_that!(
        deployment.replicas >= 1,
        "Deployment should request at least one replica, got {}",
        deployment.replicas
    );
    ensure_that!(
        expect.has_name_label(&deployment.selector_labels),
        "Deployment selector {:?} lacks {:?}",
        deployment.selector_labels,
        expect.name_label
    );

    ensure_that!(
        deployment.containers.len() == 1,
        "Deployment should have exactly one container, got {}",
        deployment.containers.len()
    );
    let container = &deployment.containers[0];
    ensure_that!(
        container.name == expect.container_name,
        "Container should be named {}, got {}",
        expect.container_name,
        container.name
    );
    ensure_that!(
        container.image.contains(&expect.image_substring),
        "Container image {} should contain {}",
        container.image,
        expect.image_substring
    );
    ensure_that!(
        container.ports.len() == 1,
        "Container should expose exactly one port, got {:?}",
        container.ports
    );
    let port = &container.ports[0];
    ensure_that!(
        port.container_port == expect.port && port.name.as_deref() == Some(expect.port_name.as_str()),
        "Container port should be {} named {}, got {port:?}",
        expect.port,
        expect.port_name
    );
    Ok(())
}

/// `ready == available == replicas >= 1`.
pub fn deployment_is_ready(deployment: &DeploymentSummary) -> bool {
    deployment.replicas >= 1
        && deployment.ready_replicas == deployment.replicas
        && deployment.available_replicas == deployment.replicas
}

pub async fn wait_deployment_ready(
    probe: &dyn ClusterProbe,
    expect: &SquidExpectations,
) -> Result<DeploymentSummary> {
    wait_for(
        &format!("deployment {}/{} to be ready", expect.namespace, expect.deployment_name),
        &expect.poll,
        || probe.get_deployment(&expect.namespace, &expect.deployment_name),
        deployment_is_ready,
    )
    .await
}

pub async fn check_service_configured(
    probe: &dyn ClusterProbe,
    expect: &SquidExpectations,
) -> Result<()> {
    let service = probe
        .get_service(&expect.namespace, &expect.service_name)
        .await?;
    check_service(&service, expect)
}

fn check_service(service: &ServiceSummary, expect: &SquidExpectations) -> Result<()> {
    ensure_that!(
        service.name == expect.service_name && service.namespace == expect.namespace,
        "Unexpected service {}/{}",
        service.namespace,
        service.name
    );
    ensure_that!(
        service.type_ == "ClusterIP",
        "Service should be ClusterIP, got {}",
        service.type_
    );
    ensure_that!(
        expect.has_name_label(&service.selector_labels),
        "Service selector {:?} lacks {:?}",
        service.selector_labels,
        expect.name_label
    );
    ensure_that!(
        service.ports.len() == 1,
        "Service should expose exactly one port, got {:?}",
        service.ports
    );
    let port = &service.ports[0];
    ensure_that!(
        port.port == expect.port
            && port.target_port == Some(TargetPort::Named(expect.port_name.clone()))
            && port.protocol == "TCP",
        "Service port should be {}/TCP targeting {}, got {port:?}",
        expect.port,
        expect.port_name
    );
    Ok(())
}

pub async fn wait_service_endpoints_ready(
    probe: &dyn ClusterProbe,
    expect: &SquidExpectations,
) -> Result<ServiceSummary> {
    wait_for(
        &format!("service {}/{} endpoints", expect.namespace, expect.service_name),
        &expect.poll,
        || probe.get_service(&expect.namespace, &expect.service_name),
        |service| service.endpoints_ready,
    )
    .await
}

pub fn pod_is_running_and_ready(pod: &PodSummary) -> bool {
    pod.phase.as_deref() == Some("Running") && pod.ready_condition == Some(true)
}

/// Waits until the selector matches at least one pod and every matched pod is ready.
pub async fn wait_pods_running_and_ready(
    probe: &dyn ClusterProbe,
    expect: &SquidExpectations,
) -> Result<Vec<PodSummary>> {
    wait_for(
        &format!("pods [{}] to be running and ready", expect.pod_selector),
        &expect.poll,
        || probe.get_pods(&expect.namespace, &expect.pod_selector),
        |pods| !pods.is_empty() && pods.iter().all(pod_is_running_and_ready),
    )
    .await
}

pub async fn check_pod_containers(probe: &dyn ClusterProbe, expect: &SquidExpectations) -> Result<()> {
    let pods = probe
        .get_pods(&expect.namespace, &expect.pod_selector)
        .await?;
    ensure_that!(!pods.is_empty(), "No squid pods found");

    for pod in &pods {
        ensure_that!(
            pod.containers.len() == 1,
            "Pod {} should have exactly one container, got {}",
            pod.name,
            pod.containers.len()
        );
        check_container(&pod.name, &pod.containers[0], expect)?;
    }
    Ok(())
}

fn check_container(pod: &str, container: &ContainerSummary, expect: &SquidExpectations) -> Result<()> {
    ensure_that!(
        container.name == expect.container_name,
        "Pod {pod} container should be named {}, got {}",
        expect.container_name,
        container.name
    );
    ensure_that!(
        container.run_as_non_root != Some(false),
        "Pod {pod} container must not run as root"
    );
    ensure_that!(
        container
            .volume_mounts
            .iter()
            .any(|m| m.name == expect.config_mount_name || m.mount_path == expect.config_mount_path),
        "Pod {pod} should have the squid configuration mounted, mounts are {:?}",
        container.volume_mounts
    );
    Ok(())
}

/// The config must carry the expected literal substrings. This is a smoke test, not a parse.
pub async fn check_config_map(probe: &dyn ClusterProbe, expect: &SquidExpectations) -> Result<()> {
    let data = probe
        .get_config_map(&expect.namespace, &expect.config_map_name)
        .await?;

    let Some(config) = data.get(&expect.config_key) else {
        return Err(HarnessError::assertion(format!(
            "ConfigMap {} has no key {}, keys are {:?}",
            expect.config_map_name,
            expect.config_key,
            data.keys().collect::<Vec<_>>()
        )));
    };
    for needle in &expect.config_substrings {
        ensure_that!(
            config.contains(needle.as_str()),
            "{} in ConfigMap {} should contain `{needle}`",
            expect.config_key,
            expect.config_map_name
        );
    }
    Ok(())
}

/// Runs every structural check in order and stops at the first failure.
pub async fn check_structural_health(
    probe: &dyn ClusterProbe,
    expect: &SquidExpectations,
) -> Result<()> {
    check_namespace_active(probe, expect).await?;
    check_deployment_configured(probe, expect).await?;
    let deployment = wait_deployment_ready(probe, expect).await?;
    tracing::info!(
        replicas = deployment.replicas,
        "Deployment {}/{} is ready",
        deployment.namespace,
        deployment.name
    );
    check_service_configured(probe, expect).await?;
    wait_service_endpoints_ready(probe, expect).await?;
    let pods = wait_pods_running_and_ready(probe, expect).await?;
    tracing::info!("{} squid pods are running and ready", pods.len());
    check_pod_containers(probe, expect).await?;
    check_config_map(probe, expect).await?;
    Ok(())
}
