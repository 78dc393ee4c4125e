#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use anyhow::Context as _;
use caching::{command::SystemRunner, config::OpsConfig, Ops};
use clap::Parser as _;
use cli::{BuildCommand, Cli, Command, DeployCommand, KindCommand, TestCommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,caching=info".into()),
            ),
        )
        .init();

    let fut = async {
        let config = OpsConfig::load(cli.config.config_file, cli.config.config_content)
            .context("Failed to load config")?;
        tracing::debug!("Config: {config:#?}");

        let ops = Ops::new(SystemRunner, config);
        let task = async {
            match &cli.command {
                Command::Kind(KindCommand::Up) => ops.kind_up().await,
                Command::Kind(KindCommand::UpClean) => ops.kind_up_clean().await,
                Command::Kind(KindCommand::Down) => ops.kind_down().await,
                Command::Kind(KindCommand::Status) => ops.kind_status().await,
                Command::Build(BuildCommand::Squid) => ops.build_squid().await,
                Command::Build(BuildCommand::LoadSquid) => ops.load_squid().await,
                Command::Deploy(DeployCommand::Helm) => ops.deploy_helm().await,
                Command::Deploy(DeployCommand::Status) => ops.deploy_status().await,
                Command::Deploy(DeployCommand::Uninstall) => ops.deploy_uninstall().await,
                Command::Test(TestCommand::E2e { args }) => ops.test_e2e(args).await,
                Command::All => ops.all().await,
                Command::Clean => ops.clean().await,
            }
        };

        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        // Child processes are killed when their futures are dropped.
        tokio::select! {
            _ = sigint.recv() => anyhow::bail!("We got SIGINT, cancel now"),
            _ = sigterm.recv() => anyhow::bail!("We got SIGTERM, cancel now"),
            res = task => res?,
        }

        Ok::<_, anyhow::Error>(())
    };

    if let Err(error) = fut.await {
        tracing::error!(error = format!("{error:#}"));
        std::process::exit(1);
    }
}
