use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Local lifecycle of the Squid caching proxy", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigOptions,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct ConfigOptions {
    /// JSON file with the environment settings
    #[arg(short, long, global = true)]
    pub config_file: Option<PathBuf>,

    /// The same settings as an inline JSON string
    #[arg(long, global = true)]
    pub config_content: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the kind cluster
    #[command(subcommand)]
    Kind(KindCommand),

    /// Build container images
    #[command(subcommand)]
    Build(BuildCommand),

    /// Manage the Helm release
    #[command(subcommand)]
    Deploy(DeployCommand),

    /// Run test suites
    #[command(subcommand)]
    Test(TestCommand),

    /// Cluster, image and release in one go
    All,

    /// Remove the cluster and the built image
    Clean,
}

#[derive(Subcommand, Debug)]
pub enum KindCommand {
    /// Create the cluster unless it exists
    Up,
    /// Recreate the cluster from scratch
    UpClean,
    /// Delete the cluster
    Down,
    /// Show cluster and node status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum BuildCommand {
    /// Build the Squid image with podman
    Squid,
    /// Load the Squid image into the cluster
    LoadSquid,
}

#[derive(Subcommand, Debug)]
pub enum DeployCommand {
    /// Install or upgrade the Squid chart
    Helm,
    /// Show pods and services of the release
    Status,
    /// Uninstall the release and delete its namespace
    Uninstall,
}

#[derive(Subcommand, Debug)]
pub enum TestCommand {
    /// Run the e2e suite against the cluster
    E2e {
        /// Extra arguments for the test binary
        #[arg(last = true)]
        args: Vec<String>,
    },
}
