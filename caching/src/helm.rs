use again::RetryPolicy;

use crate::{
    command::{Cmd, CommandRunner},
    error::{OpsError, Result},
    Ops,
};

impl<R: CommandRunner> Ops<R> {
    pub async fn release_exists(&self) -> Result<bool> {
        let context = self.config.kube_context();
        self.runner
            .succeeds(&Cmd::new("helm").args([
                "status",
                self.config.release_name.as_str(),
                "-n",
                self.config.namespace.as_str(),
                "--kube-context",
                context.as_str(),
            ]))
            .await
    }

    /// Installs or upgrades the Squid release and waits for the rollout.
    pub async fn deploy_helm(&self) -> Result<()> {
        let config = &self.config;
        let context = config.kube_context();
        let timeout = format!("{}s", config.helm_timeout_secs);

        for repo in &config.helm_repos {
            tracing::info!("Ensuring helm repository '{}' is available", repo.name);
            self.runner
                .run(&Cmd::new("helm").args([
                    "repo",
                    "add",
                    repo.name.as_str(),
                    repo.url.as_str(),
                    "--force-update",
                ]))
                .await?;
        }

        if self.release_exists().await? {
            tracing::info!("Upgrading existing release '{}'", config.release_name);
        } else {
            tracing::info!("Installing release '{}'", config.release_name);
        }

        let mut upgrade = Cmd::new("helm").args([
            "upgrade",
            "--install",
            config.release_name.as_str(),
            config.chart_path.as_str(),
            "--namespace",
            config.namespace.as_str(),
            "--create-namespace",
            "--wait",
            "--timeout",
            timeout.as_str(),
            "--kube-context",
            context.as_str(),
        ]);
        for value in &config.helm_set {
            upgrade = upgrade.arg("--set").arg(value.as_str());
        }
        self.runner.run(&upgrade).await?;

        self.runner
            .run(&Cmd::new("kubectl").args([
                "rollout".to_owned(),
                "status".to_owned(),
                format!("deployment/{}", config.deployment_name),
                "-n".to_owned(),
                config.namespace.clone(),
                format!("--timeout={timeout}"),
                "--context".to_owned(),
                context.clone(),
            ]))
            .await?;

        tracing::info!(
            "Release '{}' deployed to namespace '{}'",
            config.release_name,
            config.namespace
        );
        Ok(())
    }

    pub async fn deploy_status(&self) -> Result<()> {
        let context = self.config.kube_context();
        for kind in ["pods", "services"] {
            self.runner
                .run(&Cmd::new("kubectl").args([
                    "get",
                    kind,
                    "-n",
                    self.config.namespace.as_str(),
                    "--context",
                    context.as_str(),
                ]))
                .await?;
        }
        Ok(())
    }

    /// Removes the release and its namespace, then waits for the namespace to disappear.
    pub async fn deploy_uninstall(&self) -> Result<()> {
        let config = &self.config;
        let context = config.kube_context();

        if self.release_exists().await? {
            tracing::info!("Uninstalling release '{}'", config.release_name);
            self.runner
                .run(&Cmd::new("helm").args([
                    "uninstall",
                    config.release_name.as_str(),
                    "-n",
                    config.namespace.as_str(),
                    "--kube-context",
                    context.as_str(),
                ]))
                .await?;
        } else {
            tracing::info!("Release '{}' is not installed", config.release_name);
        }

        self.runner
            .run(&Cmd::new("kubectl").args([
                "delete",
                "namespace",
                config.namespace.as_str(),
                "--ignore-not-found",
                "--context",
                context.as_str(),
            ]))
            .await?;

        self.wait_namespace_deleted().await
    }

    async fn wait_namespace_deleted(&self) -> Result<()> {
        let namespace = &self.config.namespace;
        let wait = self.config.namespace_wait;
        let context = self.config.kube_context();
        let get = Cmd::new("kubectl").args([
            "get",
            "namespace",
            namespace.as_str(),
            "--context",
            context.as_str(),
        ]);

        tracing::info!("Waiting for namespace '{namespace}' to be fully deleted");
        let retry_policy = RetryPolicy::fixed(wait.interval())
            .with_max_retries(wait.max_attempts.saturating_sub(1));

        // `None` means the namespace is still there.
        let result = retry_policy
            .retry(|| async {
                match self.runner.succeeds(&get).await {
                    Ok(true) => Err(None),
                    Ok(false) => Ok(()),
                    Err(e) => Err(Some(e)),
                }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Namespace '{namespace}' has been deleted");
                Ok(())
            }
            Err(None) => Err(OpsError::Timeout {
                what: format!("namespace '{namespace}' to be deleted"),
                attempts: wait.max_attempts,
            }),
            Err(Some(e)) => Err(e),
        }
    }
}
