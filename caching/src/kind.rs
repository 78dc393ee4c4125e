use crate::{
    command::{Cmd, CommandRunner},
    error::Result,
    Ops,
};

impl<R: CommandRunner> Ops<R> {
    /// Looks the cluster up in `kind get clusters`.
    pub async fn cluster_exists(&self) -> Result<bool> {
        let cmd = Cmd::new("kind").args(["get", "clusters"]);
        let output = self.runner.output(&cmd).await?.check(&cmd)?;
        Ok(output
            .stdout
            .lines()
            .any(|line| line.trim() == self.config.cluster_name))
    }

    pub async fn kind_up(&self) -> Result<()> {
        let name = &self.config.cluster_name;
        if self.cluster_exists().await? {
            tracing::info!("Cluster '{name}' already exists");
        } else {
            self.create_cluster().await?;
        }
        self.export_kubeconfig().await?;
        tracing::info!("Cluster '{name}' is ready, kubectl context is {}", self.config.kube_context());
        Ok(())
    }

    /// Recreates the cluster from scratch.
    pub async fn kind_up_clean(&self) -> Result<()> {
        let name = &self.config.cluster_name;
        if self.cluster_exists().await? {
            tracing::info!("Deleting existing cluster '{name}'");
            self.delete_cluster().await?;
        }
        self.create_cluster().await?;
        self.export_kubeconfig().await?;
        tracing::info!("Fresh cluster '{name}' is ready");
        Ok(())
    }

    pub async fn kind_down(&self) -> Result<()> {
        let name = &self.config.cluster_name;
        if !self.cluster_exists().await? {
            tracing::info!("Cluster '{name}' does not exist, nothing to tear down");
            return Ok(());
        }
        self.delete_cluster().await?;
        tracing::info!("Cluster '{name}' deleted");
        Ok(())
    }

    /// Reports on the cluster. Only a failure to list clusters is an error.
    pub async fn kind_status(&self) -> Result<()> {
        let name = &self.config.cluster_name;
        if !self.cluster_exists().await? {
            tracing::warn!("Cluster '{name}' does not exist, run `caching kind up` to create it");
            return Ok(());
        }
        tracing::info!("Cluster '{name}' exists");

        let context = self.config.kube_context();
        let cluster_info = Cmd::new("kubectl").args(["cluster-info", "--context", context.as_str()]);
        match self.runner.output(&cluster_info).await?.check(&cluster_info) {
            Ok(output) => tracing::info!("Cluster info:\n{}", output.stdout.trim_end()),
            Err(e) => {
                tracing::warn!(error=%e, "Cluster '{name}' is not reachable, try `caching kind up`");
                return Ok(());
            }
        }

        let nodes = Cmd::new("kubectl").args(["get", "nodes", "--context", context.as_str()]);
        if let Err(e) = self.runner.run(&nodes).await {
            tracing::warn!(error=%e, "Failed to list nodes of cluster '{name}'");
        }
        Ok(())
    }

    async fn create_cluster(&self) -> Result<()> {
        tracing::info!("Creating kind cluster '{}'", self.config.cluster_name);
        self.runner
            .run(&Cmd::new("kind").args([
                "create",
                "cluster",
                "--name",
                self.config.cluster_name.as_str(),
                "--wait",
                self.config.kind_wait.as_str(),
            ]))
            .await
    }

    async fn delete_cluster(&self) -> Result<()> {
        self.runner
            .run(&Cmd::new("kind").args(["delete", "cluster", "--name", self.config.cluster_name.as_str()]))
            .await
    }

    async fn export_kubeconfig(&self) -> Result<()> {
        self.runner
            .run(&Cmd::new("kind").args(["export", "kubeconfig", "--name", self.config.cluster_name.as_str()]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        command::testing::RecordingRunner, config::OpsConfig, error::OpsError, Ops,
    };

    fn ops() -> Ops<RecordingRunner> {
        Ops::new(RecordingRunner::default(), OpsConfig::default())
    }

    #[tokio::test]
    async fn test_cluster_exists_matches_whole_lines() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner().respond("kind get clusters", true, "caching-old\n  caching  \nother\n");
        assert!(ops.cluster_exists().await?);

        ops.runner().respond("kind get clusters", true, "caching-old\ncachingx\n");
        assert!(!ops.cluster_exists().await?);

        ops.runner().respond("kind get clusters", true, "No kind clusters found.\n");
        assert!(!ops.cluster_exists().await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_error() {
        let ops = ops();
        ops.runner().respond("kind get clusters", false, "");
        let err = ops.cluster_exists().await.unwrap_err();
        assert!(matches!(err, OpsError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_up_creates_missing_cluster() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner().respond("kind get clusters", true, "");
        ops.kind_up().await?;
        assert_eq!(
            ops.runner().commands(),
            [
                "kind get clusters",
                "kind create cluster --name caching --wait 60s",
                "kind export kubeconfig --name caching",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_up_reuses_existing_cluster() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner().respond("kind get clusters", true, "caching\n");
        ops.kind_up().await?;
        assert_eq!(
            ops.runner().commands(),
            ["kind get clusters", "kind export kubeconfig --name caching"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_up_clean_recreates() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner().respond("kind get clusters", true, "caching\n");
        ops.kind_up_clean().await?;
        assert_eq!(
            ops.runner().commands(),
            [
                "kind get clusters",
                "kind delete cluster --name caching",
                "kind create cluster --name caching --wait 60s",
                "kind export kubeconfig --name caching",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_down_without_cluster_is_noop() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner().respond("kind get clusters", true, "other\n");
        ops.kind_down().await?;
        assert_eq!(ops.runner().commands(), ["kind get clusters"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_tolerates_unreachable_cluster() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner()
            .respond("kind get clusters", true, "caching\n")
            .respond("kubectl cluster-info", false, "");
        ops.kind_status().await?;
        assert_eq!(
            ops.runner().commands(),
            ["kind get clusters", "kubectl cluster-info --context kind-caching"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_status_lists_nodes() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner()
            .respond("kind get clusters", true, "caching\n")
            .respond("kubectl get nodes", false, "");
        ops.kind_status().await?;
        assert_eq!(
            ops.runner().commands(),
            [
                "kind get clusters",
                "kubectl cluster-info --context kind-caching",
                "kubectl get nodes --context kind-caching",
            ]
        );
        Ok(())
    }
}
