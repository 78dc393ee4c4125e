pub mod app;
pub mod buster;
pub mod error;
pub mod probe;
pub mod properties;
pub mod settings;

use std::{future::Future, sync::Arc};

use anyhow::{bail, Context, Result};
use app::{ProxyClient, TestServer};
use settings::HarnessSettings;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::OnceCell,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

static TRACING_INIT: OnceCell<()> = OnceCell::const_new();

/// Installs the rustls crypto provider and the log subscriber, once per process.
///
/// `RUST_LOG` overrides the default filter.
pub async fn init_tracing() {
    TRACING_INIT
        .get_or_init(|| async {
            // Both kube and reqwest talk TLS through rustls.
            if rustls::crypto::ring::default_provider()
                .install_default()
                .is_err()
            {
                tracing::debug!("A rustls crypto provider is already installed");
            }

            let _ = tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "info,caching_testsuite=debug".into()),
                ))
                .try_init();
        })
        .await;
}

/// The per-test origin server and the client that reaches it through the proxy.
pub struct Fixture {
    pub server: TestServer,
    pub client: ProxyClient,
}

/// Builds a [`Fixture`] from `settings`, runs `test` against it and tears the server down
/// whatever the outcome. SIGINT and SIGTERM abort the test.
pub async fn run_with_fixture<F, Fut>(settings: &HarnessSettings, test: F) -> Result<()>
where
    F: FnOnce(Arc<Fixture>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    init_tracing().await;

    let server = TestServer::start(
        settings.message.clone(),
        &settings.pod_ip,
        settings.test_server_port,
    )
    .await
    .context("Failed to create test server")?;

    let client = match ProxyClient::with_proxy_url(&settings.proxy_url) {
        Ok(client) => client,
        Err(e) => {
            server.shutdown().await;
            return Err(e).context("Failed to create proxy client");
        }
    };

    let fixture = Arc::new(Fixture { server, client });
    let result = run_until_signal(test(fixture.clone())).await;
    fixture.server.shutdown().await;
    result
}

/// Drives `future` to completion unless the process is asked to stop first.
pub async fn run_until_signal<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            bail!("We got {}, cancel now", signal?);
        }
        res = future => res,
    }
}

/// Resolves with the name of the first of SIGINT or SIGTERM to arrive.
pub async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    fn local_settings(proxy_url: &str) -> HarnessSettings {
        HarnessSettings {
            pod_ip: "127.0.0.1".to_owned(),
            test_server_port: 0,
            namespace: settings::DEFAULT_NAMESPACE.to_owned(),
            service_name: settings::DEFAULT_SERVICE_NAME.to_owned(),
            proxy_url: proxy_url.to_owned(),
            message: settings::DEFAULT_TEST_SERVER_MESSAGE.to_owned(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fixture_is_torn_down_after_failure() -> Result<()> {
        let mut kept = None;
        let result = run_with_fixture(&local_settings("http://127.0.0.1:3128"), |fixture| {
            kept = Some(fixture.clone());
            async move { Err::<(), _>(anyhow::anyhow!("property failed")) }
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("property failed"));
        let fixture = kept.context("fixture was never handed out")?;
        assert!(fixture.server.is_closed());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bad_proxy_url_fails_setup() {
        let err = run_with_fixture(&local_settings("::not a url::"), |_| async {
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_future_result_is_returned() -> Result<()> {
        let value = run_until_signal(async { Ok::<_, anyhow::Error>(42) }).await?;
        assert_eq!(value, 42);
        Ok(())
    }
}
