//! A minimal forward proxy standing in for Squid so the cache properties can run
//! without a cluster.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use caching_testsuite::settings::{
    HarnessSettings, DEFAULT_NAMESPACE, DEFAULT_SERVICE_NAME, DEFAULT_TEST_SERVER_MESSAGE,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Stores responses marked `public` and replays them for the same absolute URI.
    Caching,
    /// Forwards every request to the origin.
    PassThrough,
}

#[derive(Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

struct ProxyState {
    mode: ProxyMode,
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CachedResponse>>,
    upstream_requests: AtomicUsize,
}

pub struct StubProxy {
    url: String,
    state: Arc<ProxyState>,
    token: CancellationToken,
    join_handle: JoinHandle<std::io::Result<()>>,
}

impl StubProxy {
    pub async fn start(mode: ProxyMode) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);

        let state = Arc::new(ProxyState {
            mode,
            client: reqwest::Client::builder()
                .no_proxy()
                .build()
                .context("Failed to build upstream client")?,
            cache: Mutex::new(HashMap::new()),
            upstream_requests: AtomicUsize::new(0),
        });
        let app = Router::new().fallback(forward).with_state(state.clone());

        let token = CancellationToken::new();
        let join_handle = tokio::task::spawn({
            let token = token.clone();
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(token.cancelled_owned())
                    .await
            }
        });

        tracing::info!("Stub proxy ({mode:?}) listening on {url}");
        Ok(Self {
            url,
            state,
            token,
            join_handle,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn upstream_requests(&self) -> usize {
        self.state.upstream_requests.load(Ordering::SeqCst)
    }

    /// Settings for a test server on the loopback interface, reached through this proxy.
    pub fn settings(&self) -> HarnessSettings {
        HarnessSettings {
            pod_ip: "127.0.0.1".to_owned(),
            test_server_port: 0,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            proxy_url: self.url.clone(),
            message: DEFAULT_TEST_SERVER_MESSAGE.to_owned(),
        }
    }

    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join_handle.await {
            tracing::warn!(error=?e, "Stub proxy task failed");
        }
    }
}

async fn forward(State(state): State<Arc<ProxyState>>, request: Request) -> Response {
    // Requests arrive in absolute form, so the URI is the full cache key.
    let key = request.uri().to_string();

    if state.mode == ProxyMode::Caching {
        let hit = state
            .cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(&key).cloned());
        if let Some(hit) = hit {
            tracing::debug!("Stub proxy cache hit for {key}");
            return (hit.status, hit.headers, hit.body).into_response();
        }
    }

    state.upstream_requests.fetch_add(1, Ordering::SeqCst);
    let upstream = match state.client.get(&key).send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::debug!(error=%e, "Stub proxy could not reach {key}");
            return (StatusCode::BAD_GATEWAY, "Upstream unreachable").into_response();
        }
    };

    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for name in [header::CACHE_CONTROL, header::CONTENT_TYPE] {
        if let Some(value) = upstream.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }
    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(_) => return (StatusCode::BAD_GATEWAY, "Upstream body truncated").into_response(),
    };

    let cacheable = headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("public"));
    if state.mode == ProxyMode::Caching && status == StatusCode::OK && cacheable {
        if let Ok(mut cache) = state.cache.lock() {
            cache.entry(key).or_insert_with(|| CachedResponse {
                status,
                headers: headers.clone(),
                body: body.clone(),
            });
        }
    }

    (status, headers, body).into_response()
}
