//! Composite targets built from the individual tasks.

use crate::{
    command::{Cmd, CommandRunner},
    error::{OpsError, Result},
    Ops,
};

pub const E2E_PACKAGE: &str = "caching-testsuite";
pub const E2E_TEST: &str = "e2e";
/// Name prefix of the e2e tests that need the pod network of the cluster.
pub const IN_POD_TEST_PREFIX: &str = "test_proxy_";
const POD_IP_ENV: &str = "POD_IP";

impl<R: CommandRunner> Ops<R> {
    /// Cluster, image, release, in that order.
    pub async fn all(&self) -> Result<()> {
        tracing::info!("Running complete automation workflow");
        self.kind_up().await?;
        self.build_squid().await?;
        self.load_squid().await?;
        self.deploy_helm().await?;
        self.deploy_status().await?;
        tracing::info!("Environment is ready");
        Ok(())
    }

    pub async fn clean(&self) -> Result<()> {
        tracing::info!("Cleaning up all resources");
        self.kind_down().await?;
        self.remove_squid_image().await?;
        Ok(())
    }

    /// Runs the e2e suite, including the cluster tests, against the kind cluster.
    ///
    /// The kubeconfig of the cluster is written to a temporary file so the suite never
    /// talks to whatever context happens to be current. `extra_args` go to the test binary.
    /// Outside a pod (no `POD_IP`) the tests that go through the proxy are skipped.
    pub async fn test_e2e(&self, extra_args: &[String]) -> Result<()> {
        let in_pod = std::env::var_os(POD_IP_ENV).is_some();
        self.run_e2e(in_pod, extra_args).await
    }

    async fn run_e2e(&self, in_pod: bool, extra_args: &[String]) -> Result<()> {
        let cmd = Cmd::new("kind").args([
            "get",
            "kubeconfig",
            "--name",
            self.config.cluster_name.as_str(),
        ]);
        let kubeconfig = self.runner.output(&cmd).await?.check(&cmd)?.stdout;

        let dir = tempfile::tempdir().map_err(|source| OpsError::Io {
            what: "kubeconfig directory".to_owned(),
            source,
        })?;
        let kubeconfig_path = dir.path().join("kubeconfig");
        tokio::fs::write(&kubeconfig_path, kubeconfig)
            .await
            .map_err(|source| OpsError::Io {
                what: format!("kubeconfig {}", kubeconfig_path.display()),
                source,
            })?;

        if in_pod {
            tracing::info!("Running e2e tests against cluster '{}'", self.config.cluster_name);
        } else {
            tracing::info!(
                "Running e2e tests against cluster '{}', skipping {IN_POD_TEST_PREFIX}* (no {POD_IP_ENV})",
                self.config.cluster_name
            );
        }
        self.runner
            .run(
                &Cmd::new("cargo")
                    .args(e2e_args(in_pod, extra_args))
                    .env("KUBECONFIG", kubeconfig_path.as_os_str()),
            )
            .await
    }
}

fn e2e_args(in_pod: bool, extra_args: &[String]) -> Vec<String> {
    let mut args: Vec<String> = [
        "test",
        "-p",
        E2E_PACKAGE,
        "--test",
        E2E_TEST,
        "--",
        "--include-ignored",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect();
    if !in_pod {
        args.extend(["--skip".to_owned(), IN_POD_TEST_PREFIX.to_owned()]);
    }
    args.extend(extra_args.iter().cloned());
    args
}
