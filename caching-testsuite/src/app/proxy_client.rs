use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use url::Url;

use crate::error::{HarnessError, Result};

pub const SQUID_PORT: u16 = 3128;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status, headers and full body of a response received through the proxy.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An HTTP client that sends every request through the Squid proxy under test.
///
/// Idle connections are never pooled, so each request opens a fresh connection to the
/// proxy and nothing on the client side can answer a request on the proxy's behalf.
#[derive(Clone, Debug)]
pub struct ProxyClient {
    proxy_url: Url,
    client: reqwest::Client,
}

impl ProxyClient {
    /// Routes through `http://<service_name>.<namespace>.svc.cluster.local:3128`.
    pub fn new(service_name: &str, namespace: &str) -> Result<Self> {
        Self::with_proxy_url(&cluster_proxy_url(service_name, namespace))
    }

    pub fn with_proxy_url(proxy_url: &str) -> Result<Self> {
        let proxy_url = Url::parse(proxy_url).map_err(|e| {
            HarnessError::config(format!("Failed to parse proxy URL `{proxy_url}`: {e}"))
        })?;

        let proxy = reqwest::Proxy::all(proxy_url.as_str()).map_err(|e| {
            HarnessError::config(format!("Invalid proxy URL `{proxy_url}`: {e}"))
        })?;

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .pool_max_idle_per_host(0)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HarnessError::config(format!("Failed to build HTTP client: {e}")))?;

        tracing::debug!("Created proxy client via {proxy_url}");
        Ok(Self { proxy_url, client })
    }

    pub fn proxy_url(&self) -> &Url {
        &self.proxy_url
    }

    /// Issues a GET through the proxy and reads the whole body.
    pub async fn get(&self, url: &str) -> Result<ProxyResponse> {
        let transport = |source| HarnessError::Transport {
            url: url.to_owned(),
            source,
        };

        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(transport)?;

        tracing::debug!(%status, body = %String::from_utf8_lossy(&body), "Got response for {url}");

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

pub fn cluster_proxy_url(service_name: &str, namespace: &str) -> String {
    format!("http://{service_name}.{namespace}.svc.cluster.local:{SQUID_PORT}")
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Instant,
    };

    use anyhow::Result;
    use axum::{extract::Request, Router};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn test_cluster_proxy_url() -> Result<()> {
        let client = ProxyClient::new("squid", "proxy")?;
        assert_eq!(
            client.proxy_url().as_str(),
            "http://squid.proxy.svc.cluster.local:3128/"
        );
        Ok(())
    }

    #[test]
    fn test_unparseable_proxy_url_is_config_error() {
        let err = ProxyClient::with_proxy_url("not a url").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)), "got {err:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_requests_are_sent_to_the_proxy() -> Result<()> {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let proxy_port = listener.local_addr()?.port();
        let app = Router::new().fallback({
            let seen = seen.clone();
            move |request: Request| async move {
                if let Ok(mut seen) = seen.lock() {
                    seen.push(request.uri().to_string());
                }
                "from proxy"
            }
        });
        let join_handle = tokio::task::spawn(async move { axum::serve(listener, app).await });

        let client = ProxyClient::with_proxy_url(&format!("http://127.0.0.1:{proxy_port}"))?;
        // Nothing listens on the origin; only the proxy can answer.
        let origin_port = portpicker::pick_unused_port().expect("no free port");
        let url = format!("http://127.0.0.1:{origin_port}/endpoint1?a=1");
        let resp = client.get(&url).await?;

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(&resp.body[..], b"from proxy");
        assert_eq!(*seen.lock().expect("poisoned"), vec![url]);

        join_handle.abort();
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unreachable_proxy_fails_fast() -> Result<()> {
        let proxy_port = portpicker::pick_unused_port().expect("no free port");
        let client = ProxyClient::with_proxy_url(&format!("http://127.0.0.1:{proxy_port}"))?;

        let start = Instant::now();
        let err = client.get("http://10.0.0.5:8080/").await.unwrap_err();
        assert!(start.elapsed() < REQUEST_TIMEOUT);
        match err {
            HarnessError::Transport { url, .. } => assert_eq!(url, "http://10.0.0.5:8080/"),
            other => panic!("unexpected error {other:?}"),
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_request_opens_a_new_connection() -> Result<()> {
        const REQUESTS: usize = 3;
        const RESPONSE: &[u8] =
            b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\nconnection: keep-alive\r\n\r\nfrom proxy";

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let proxy_port = listener.local_addr()?.port();
        let accepted = Arc::new(AtomicUsize::new(0));

        // Answers every request on a connection and keeps it open, so a pooling client
        // would reuse it.
        let join_handle = tokio::task::spawn({
            let accepted = accepted.clone();
            async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::task::spawn(async move {
                        let mut pending = Vec::new();
                        let mut buf = [0u8; 4096];
                        loop {
                            match stream.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => pending.extend_from_slice(&buf[..n]),
                            }
                            while let Some(end) =
                                pending.windows(4).position(|w| w == b"\r\n\r\n")
                            {
                                pending.drain(..end + 4);
                                if stream.write_all(RESPONSE).await.is_err() {
                                    return;
                                }
                            }
                        }
                    });
                }
            }
        });

        let client = ProxyClient::with_proxy_url(&format!("http://127.0.0.1:{proxy_port}"))?;
        for i in 0..REQUESTS {
            let resp = client
                .get(&format!("http://10.0.0.5:8080/keepalive?n={i}"))
                .await?;
            assert_eq!(resp.status, StatusCode::OK);
            assert_eq!(&resp.body[..], b"from proxy");
        }
        assert_eq!(accepted.load(Ordering::SeqCst), REQUESTS);

        join_handle.abort();
        Ok(())
    }
}
