use std::{fs::File, io::BufReader, path::PathBuf, time::Duration};

use anyhow::{bail, Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::error::OpsError;

/// Settings of the local development environment.
///
/// Every field has a default, so an empty object (or no config at all) describes the
/// standard `caching` kind cluster with the Squid chart in namespace `proxy`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct OpsConfig {
    pub cluster_name: String,
    /// Passed to `kind create cluster --wait`.
    pub kind_wait: String,
    pub image_tag: String,
    pub containerfile: PathBuf,
    pub build_context: PathBuf,
    pub chart_path: String,
    pub release_name: String,
    pub namespace: String,
    pub deployment_name: String,
    pub helm_repos: Vec<HelmRepo>,
    /// `key=value` pairs handed to `helm upgrade --set`.
    pub helm_set: Vec<String>,
    pub helm_timeout_secs: u64,
    pub namespace_wait: NamespaceWait,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            cluster_name: "caching".to_owned(),
            kind_wait: "60s".to_owned(),
            image_tag: "localhost/konflux-ci/squid:latest".to_owned(),
            containerfile: PathBuf::from("Containerfile"),
            build_context: PathBuf::from("."),
            chart_path: "./squid".to_owned(),
            release_name: "squid".to_owned(),
            namespace: "proxy".to_owned(),
            deployment_name: "squid".to_owned(),
            helm_repos: vec![],
            helm_set: vec![],
            helm_timeout_secs: 300,
            namespace_wait: NamespaceWait::default(),
        }
    }
}

impl OpsConfig {
    /// Reads the config from a file or an inline JSON string. Neither means defaults.
    pub fn load(config_file: Option<PathBuf>, config_content: Option<String>) -> Result<Self> {
        let config: Self = match (config_file, config_content) {
            (Some(_), Some(_)) => bail!(OpsError::Config(
                "Cannot set both --config-file and --config-content at the same time".to_owned()
            )),
            (None, None) => Self::default(),
            (None, Some(s)) => serde_json::from_str(&s)?,
            (Some(path), None) => {
                tracing::info!("Loading config from: {path:?}");
                let file = File::open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                serde_json::from_reader(BufReader::new(file))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(OpsError::Config("cluster_name must not be empty".to_owned()));
        }
        if self.namespace_wait.max_attempts == 0 {
            return Err(OpsError::Config(
                "namespace_wait.max_attempts must be at least 1".to_owned(),
            ));
        }
        if let Some(bad) = self.helm_set.iter().find(|s| !s.contains('=')) {
            return Err(OpsError::Config(format!(
                "helm_set entry `{bad}` is not of the form key=value"
            )));
        }
        Ok(())
    }

    /// The kubectl context kind creates for the cluster.
    pub fn kube_context(&self) -> String {
        format!("kind-{}", self.cluster_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HelmRepo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct NamespaceWait {
    pub interval_ms: u64,
    pub max_attempts: usize,
}

impl Default for NamespaceWait {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_attempts: 60,
        }
    }
}

impl NamespaceWait {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
