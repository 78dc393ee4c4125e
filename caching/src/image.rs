use crate::{
    command::{Cmd, CommandRunner},
    error::{OpsError, Result},
    Ops,
};

const ARCHIVE_NAME: &str = "squid.tar";

impl<R: CommandRunner> Ops<R> {
    /// Builds the Squid image with podman and checks that it landed in local storage.
    pub async fn build_squid(&self) -> Result<()> {
        let tag = &self.config.image_tag;
        tracing::info!("Building Squid container image {tag}");

        self.runner
            .run(&Cmd::new("podman").args([
                "build".to_owned(),
                "-t".to_owned(),
                tag.clone(),
                "-f".to_owned(),
                self.config.containerfile.display().to_string(),
                self.config.build_context.display().to_string(),
            ]))
            .await?;

        let exists = Cmd::new("podman").args(["image", "exists", tag.as_str()]);
        if !self.runner.succeeds(&exists).await? {
            return Err(OpsError::CommandFailed {
                cmd: exists.to_string(),
                status: "image missing after build".to_owned(),
                stderr: String::new(),
            });
        }

        tracing::info!("Squid image '{tag}' is ready");
        Ok(())
    }

    /// Saves the image to an archive and loads it into every node of the kind cluster.
    pub async fn load_squid(&self) -> Result<()> {
        let tag = &self.config.image_tag;
        let cluster = &self.config.cluster_name;
        tracing::info!("Loading Squid image {tag} into kind cluster '{cluster}'");

        let dir = tempfile::tempdir().map_err(|source| OpsError::Io {
            what: "image archive directory".to_owned(),
            source,
        })?;
        let archive = dir.path().join(ARCHIVE_NAME).display().to_string();

        self.runner
            .run(&Cmd::new("podman").args(["save", "-o", archive.as_str(), tag.as_str()]))
            .await?;
        self.runner
            .run(&Cmd::new("kind").args([
                "load",
                "image-archive",
                archive.as_str(),
                "--name",
                cluster.as_str(),
            ]))
            .await?;

        tracing::info!("Squid image loaded into cluster '{cluster}'");
        Ok(())
    }

    /// Removes the local Squid image. Failure is only reported.
    pub async fn remove_squid_image(&self) -> Result<()> {
        let tag = &self.config.image_tag;
        let cmd = Cmd::new("podman").args(["rmi", "-f", tag.as_str()]);
        match self.runner.output(&cmd).await.and_then(|o| o.check(&cmd)) {
            Ok(_) => tracing::info!("Removed image {tag}"),
            Err(e) => tracing::warn!(error=%e, "Failed to remove image {tag}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{command::testing::RecordingRunner, config::OpsConfig, error::OpsError, Ops};

    fn ops() -> Ops<RecordingRunner> {
        Ops::new(RecordingRunner::default(), OpsConfig::default())
    }

    #[tokio::test]
    async fn test_build_then_verify() -> anyhow::Result<()> {
        let ops = ops();
        ops.build_squid().await?;
        assert_eq!(
            ops.runner().commands(),
            [
                "podman build -t localhost/konflux-ci/squid:latest -f Containerfile .",
                "podman image exists localhost/konflux-ci/squid:latest",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_build_fails_when_image_missing() {
        let ops = ops();
        ops.runner().respond("podman image exists", false, "");
        let err = ops.build_squid().await.unwrap_err();
        assert!(matches!(err, OpsError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn test_failed_build_stops_early() {
        let ops = ops();
        ops.runner().respond("podman build", false, "");
        assert!(ops.build_squid().await.is_err());
        assert_eq!(ops.runner().commands().len(), 1);
    }

    #[tokio::test]
    async fn test_load_uses_archive() -> anyhow::Result<()> {
        let ops = ops();
        ops.load_squid().await?;

        let commands = ops.runner().commands();
        assert_eq!(commands.len(), 2);
        let save = &commands[0];
        assert!(save.starts_with("podman save -o "), "{save}");
        assert!(save.ends_with("/squid.tar localhost/konflux-ci/squid:latest"), "{save}");

        let archive = save
            .trim_start_matches("podman save -o ")
            .trim_end_matches(" localhost/konflux-ci/squid:latest");
        assert_eq!(
            commands[1],
            format!("kind load image-archive {archive} --name caching")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_image_is_best_effort() -> anyhow::Result<()> {
        let ops = ops();
        ops.runner().respond("podman rmi", false, "");
        ops.remove_squid_image().await?;
        assert_eq!(
            ops.runner().commands(),
            ["podman rmi -f localhost/konflux-ci/squid:latest"]
        );
        Ok(())
    }
}
