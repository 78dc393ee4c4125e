//! Read-only views of the Kubernetes objects that make up the Squid deployment.

use std::{collections::BTreeMap, fmt::Debug, future::Future, time::Duration};

use async_trait::async_trait;

use crate::error::{HarnessError, Result};

mod kubernetes;

pub use kubernetes::{cluster_config, KubeProbe};

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSummary {
    pub name: String,
    pub phase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub phase: Option<String>,
    /// Status of the `Ready` condition, `None` when the pod does not report one.
    pub ready_condition: Option<bool>,
    pub containers: Vec<ContainerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSummary {
    pub name: String,
    pub image: String,
    pub ports: Vec<ContainerPortSummary>,
    pub run_as_non_root: Option<bool>,
    pub volume_mounts: Vec<VolumeMountSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPortSummary {
    pub name: Option<String>,
    pub container_port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMountSummary {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSummary {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
    /// Image of the first container.
    pub container_image: Option<String>,
    /// First port of the first container.
    pub container_port: Option<i32>,
    pub selector_labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPort {
    Named(String),
    Number(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortSummary {
    pub port: i32,
    pub target_port: Option<TargetPort>,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSummary {
    pub name: String,
    pub namespace: String,
    pub type_: String,
    pub selector_labels: BTreeMap<String, String>,
    pub ports: Vec<ServicePortSummary>,
    /// True when at least one endpoint address backs the service.
    pub endpoints_ready: bool,
}

#[async_trait]
pub trait ClusterProbe: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<NamespaceSummary>;

    async fn get_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<PodSummary>>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<DeploymentSummary>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceSummary>;

    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<BTreeMap<String, String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Re-reads until `predicate` holds on the value returned by `read`.
///
/// Read errors are treated like an unsatisfied predicate. Once the deadline passes, a
/// [`HarnessError::ReadinessTimeout`] carrying the last observed value (or the last read
/// error) is returned.
pub async fn wait_for<T, F, Fut, P>(
    what: &str,
    options: &PollOptions,
    mut read: F,
    predicate: P,
) -> Result<T>
where
    T: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + options.timeout;
    let mut last_observed = String::from("nothing");

    loop {
        match read().await {
            Ok(value) if predicate(&value) => return Ok(value),
            Ok(value) => {
                tracing::trace!("Still waiting for {what}, observed {value:?}");
                last_observed = format!("{value:?}");
            }
            Err(e) => {
                tracing::trace!("Still waiting for {what}, read failed: {e}");
                last_observed = format!("error: {e}");
            }
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(HarnessError::ReadinessTimeout {
                what: what.to_owned(),
                timeout: options.timeout,
                last_observed,
            });
        }
        tokio::time::sleep(options.interval.min(deadline - now)).await;
    }
}
