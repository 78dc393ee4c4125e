use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ConfigMap, Container, Endpoints, Namespace, Pod, PodSecurityContext, Service},
    },
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{
    api::ListParams,
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config, ResourceExt,
};

use super::{
    ClusterProbe, ContainerPortSummary, ContainerSummary, DeploymentSummary, NamespaceSummary,
    PodSummary, ServicePortSummary, ServiceSummary, TargetPort, VolumeMountSummary,
};
use crate::{
    error::{HarnessError, Result},
    settings::kubeconfig_path,
};

/// Picks in-cluster credentials when available, otherwise the on-disk kubeconfig.
///
/// The two sources are never merged.
pub async fn cluster_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    match Config::incluster() {
        Ok(config) => {
            tracing::debug!("Using in-cluster service account credentials");
            return Ok(config);
        }
        Err(e) => tracing::debug!("In-cluster config unavailable ({e}), trying kubeconfig"),
    }

    let path = kubeconfig_path(lookup)
        .ok_or_else(|| HarnessError::config("No kubeconfig path and no home directory"))?;
    let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
        HarnessError::config(format!("Failed to read kubeconfig {}: {e}", path.display()))
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            HarnessError::config(format!("Failed to load kubeconfig {}: {e}", path.display()))
        })?;

    tracing::debug!("Using kubeconfig {}", path.display());
    Ok(config)
}

/// [`ClusterProbe`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeProbe {
    client: Client,
}

impl KubeProbe {
    pub async fn from_env() -> Result<Self> {
        let config = cluster_config(|key| std::env::var(key).ok()).await?;
        Self::connect(config).await
    }

    /// Builds a client and checks that the API server answers.
    pub async fn connect(config: Config) -> Result<Self> {
        let client = Client::try_from(config)
            .map_err(|e| HarnessError::cluster_api("create client", e))?;

        Api::<Namespace>::all(client.clone())
            .get("default")
            .await
            .map_err(|e| HarnessError::cluster_api("get namespace default", e))?;

        Ok(Self { client })
    }

    async fn endpoints_ready(&self, namespace: &str, name: &str) -> Result<bool> {
        let endpoints = Api::<Endpoints>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|e| HarnessError::cluster_api(format!("get endpoints {namespace}/{name}"), e))?;
        Ok(endpoints.as_ref().is_some_and(has_ready_address))
    }
}

#[async_trait]
impl ClusterProbe for KubeProbe {
    async fn get_namespace(&self, name: &str) -> Result<NamespaceSummary> {
        let namespace = Api::<Namespace>::all(self.client.clone())
            .get(name)
            .await
            .map_err(|e| HarnessError::cluster_api(format!("get namespace {name}"), e))?;
        Ok(namespace_summary(&namespace))
    }

    async fn get_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSummary>> {
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| {
                HarnessError::cluster_api(format!("list pods {namespace} [{label_selector}]"), e)
            })?;
        Ok(pods.items.iter().map(pod_summary).collect())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<DeploymentSummary> {
        let deployment = Api::<Deployment>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| {
                HarnessError::cluster_api(format!("get deployment {namespace}/{name}"), e)
            })?;
        Ok(deployment_summary(&deployment))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceSummary> {
        let service = Api::<Service>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| HarnessError::cluster_api(format!("get service {namespace}/{name}"), e))?;
        let endpoints_ready = self.endpoints_ready(namespace, name).await?;
        Ok(service_summary(&service, endpoints_ready))
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let config_map = Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|e| {
                HarnessError::cluster_api(format!("get configmap {namespace}/{name}"), e)
            })?;
        Ok(config_map.data.unwrap_or_default())
    }
}

fn namespace_summary(namespace: &Namespace) -> NamespaceSummary {
    NamespaceSummary {
        name: namespace.name_any(),
        phase: namespace.status.as_ref().and_then(|s| s.phase.clone()),
    }
}

fn pod_summary(pod: &Pod) -> PodSummary {
    let status = pod.status.as_ref();
    let ready_condition = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True");

    let pod_security = pod.spec.as_ref().and_then(|s| s.security_context.as_ref());
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|c| container_summary(c, pod_security))
                .collect()
        })
        .unwrap_or_default();

    PodSummary {
        name: pod.name_any(),
        phase: status.and_then(|s| s.phase.clone()),
        ready_condition,
        containers,
    }
}

/// A container-level `runAsNonRoot` overrides the pod-level one.
fn container_summary(container: &Container, pod_security: Option<&PodSecurityContext>) -> ContainerSummary {
    let run_as_non_root = container
        .security_context
        .as_ref()
        .and_then(|s| s.run_as_non_root)
        .or_else(|| pod_security.and_then(|s| s.run_as_non_root));

    ContainerSummary {
        name: container.name.clone(),
        image: container.image.clone().unwrap_or_default(),
        ports: container
            .ports
            .iter()
            .flatten()
            .map(|p| ContainerPortSummary {
                name: p.name.clone(),
                container_port: p.container_port,
            })
            .collect(),
        run_as_non_root,
        volume_mounts: container
            .volume_mounts
            .iter()
            .flatten()
            .map(|m| VolumeMountSummary {
                name: m.name.clone(),
                mount_path: m.mount_path.clone(),
            })
            .collect(),
    }
}

fn deployment_summary(deployment: &Deployment) -> DeploymentSummary {
    let spec = deployment.spec.as_ref();
    let status = deployment.status.as_ref();

    let pod_security = spec
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.security_context.as_ref());
    let containers: Vec<ContainerSummary> = spec
        .and_then(|s| s.template.spec.as_ref())
        .map(|s| {
            s.containers
                .iter()
                .map(|c| container_summary(c, pod_security))
                .collect()
        })
        .unwrap_or_default();

    DeploymentSummary {
        name: deployment.name_any(),
        namespace: deployment.namespace().unwrap_or_default(),
        // The API server defaults an unset replica count to 1.
        replicas: spec.and_then(|s| s.replicas).unwrap_or(1),
        ready_replicas: status.and_then(|s| s.ready_replicas).unwrap_or(0),
        available_replicas: status.and_then(|s| s.available_replicas).unwrap_or(0),
        container_image: containers.first().map(|c| c.image.clone()),
        container_port: containers
            .first()
            .and_then(|c| c.ports.first())
            .map(|p| p.container_port),
        selector_labels: spec
            .and_then(|s| s.selector.match_labels.clone())
            .unwrap_or_default(),
        containers,
    }
}

fn service_summary(service: &Service, endpoints_ready: bool) -> ServiceSummary {
    let spec = service.spec.as_ref();
    ServiceSummary {
        name: service.name_any(),
        namespace: service.namespace().unwrap_or_default(),
        type_: spec
            .and_then(|s| s.type_.clone())
            .unwrap_or_else(|| "ClusterIP".to_owned()),
        selector_labels: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
        ports: spec
            .and_then(|s| s.ports.as_ref())
            .into_iter()
            .flatten()
            .map(|p| ServicePortSummary {
                port: p.port,
                target_port: p.target_port.as_ref().map(|t| match t {
                    IntOrString::Int(n) => TargetPort::Number(*n),
                    IntOrString::String(s) => TargetPort::Named(s.clone()),
                }),
                protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_owned()),
            })
            .collect(),
        endpoints_ready,
    }
}

fn has_ready_address(endpoints: &Endpoints) -> bool {
    endpoints
        .subsets
        .iter()
        .flatten()
        .any(|subset| subset.addresses.as_ref().is_some_and(|a| !a.is_empty()))
}
