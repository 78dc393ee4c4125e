#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use anyhow::Context as _;
use caching_testsuite::{
    app::TestServer,
    settings::{pod_ip, test_server_port},
};
use clap::Parser as _;
use cli::Cli;

mod cli;

const DEFAULT_PORT: u16 = 9090;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    caching_testsuite::init_tracing().await;

    let fut = async {
        let lookup = |key: &str| std::env::var(key).ok();

        let port = match test_server_port(lookup).context("Failed to determine listen port")? {
            Some(port) => {
                tracing::info!("Using port from TEST_SERVER_PORT: {port}");
                port
            }
            None => {
                tracing::info!("Using default port: {DEFAULT_PORT}");
                DEFAULT_PORT
            }
        };
        let pod_ip = pod_ip(lookup)?;

        let server = TestServer::start(cli.message, &pod_ip, port).await?;
        tracing::info!("Test server ready at {}", server.url());

        let signal = caching_testsuite::wait_for_shutdown_signal().await;
        tracing::info!("Shutting down test server");
        server.shutdown().await;
        tracing::info!(
            "Served {} requests, gracefully exit now",
            server.request_count()
        );

        signal?;
        Ok::<_, anyhow::Error>(())
    };

    if let Err(error) = fut.await {
        tracing::error!(error = format!("{error:#}"));
        std::process::exit(1);
    }
}
