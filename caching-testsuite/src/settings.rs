//! Environment-derived settings shared by the e2e suite and the `testserver` binary.

use std::path::PathBuf;

use crate::{
    app::cluster_proxy_url,
    error::{HarnessError, Result},
};

pub const POD_IP_ENV: &str = "POD_IP";
pub const TEST_SERVER_PORT_ENV: &str = "TEST_SERVER_PORT";
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

pub const DEFAULT_NAMESPACE: &str = "proxy";
pub const DEFAULT_SERVICE_NAME: &str = "squid";
pub const DEFAULT_DEPLOYMENT_NAME: &str = "squid";
pub const DEFAULT_TEST_SERVER_MESSAGE: &str = "Hello from test server";

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessSettings {
    /// Peer-reachable address advertised in the test server URL.
    pub pod_ip: String,
    /// `0` asks the kernel for an ephemeral port.
    pub test_server_port: u16,
    pub namespace: String,
    pub service_name: String,
    /// Forward proxy every test request goes through.
    pub proxy_url: String,
    pub message: String,
}

impl HarnessSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pod_ip = pod_ip(&lookup)?;
        let test_server_port = test_server_port(&lookup)?.unwrap_or(0);

        tracing::debug!(%pod_ip, test_server_port, "Loaded harness settings");

        Ok(Self {
            pod_ip,
            test_server_port,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            proxy_url: cluster_proxy_url(DEFAULT_SERVICE_NAME, DEFAULT_NAMESPACE),
            message: DEFAULT_TEST_SERVER_MESSAGE.to_owned(),
        })
    }
}

/// Reads the pod IP injected through the downward API.
pub fn pod_ip(lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    match lookup(POD_IP_ENV) {
        Some(ip) if !ip.trim().is_empty() => Ok(ip.trim().to_owned()),
        _ => Err(HarnessError::config(format!(
            "{POD_IP_ENV} environment variable not set (requires downward API)"
        ))),
    }
}

/// Returns the fixed listen port, `None` if the variable is unset or empty.
pub fn test_server_port(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<u16>> {
    match lookup(TEST_SERVER_PORT_ENV) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => value.trim().parse::<u16>().map(Some).map_err(|e| {
            HarnessError::config(format!(
                "Invalid {TEST_SERVER_PORT_ENV} value '{value}': {e}"
            ))
        }),
    }
}

/// Path of the on-disk cluster config used when running outside the cluster.
pub fn kubeconfig_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = lookup(KUBECONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".kube").join("config"))
}
