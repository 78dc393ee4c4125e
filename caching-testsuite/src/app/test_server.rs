use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::IntoResponse,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::{HarnessError, Result};

pub const CACHE_CONTROL_VALUE: &str = "public, max-age=300";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// The JSON body the origin emits for every request it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestServerResponse {
    pub message: String,
    pub request_id: u64,
    pub timestamp: i64,
    pub server_hits: u64,
}

impl TestServerResponse {
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| {
            HarnessError::assertion(format!(
                "Failed to parse JSON response `{}`: {e}",
                String::from_utf8_lossy(body)
            ))
        })
    }
}

struct OriginState {
    message: String,
    counter: AtomicU64,
}

/// An HTTP origin which counts the requests it serves.
///
/// The server listens on all interfaces so that the proxy, running in another pod, can
/// reach it through the advertised `url`. Every request is answered with a cacheable
/// [`TestServerResponse`] carrying the post-increment value of the counter, so a test can
/// tell cache hits from origin hits both from the body and from [`Self::request_count`].
pub struct TestServer {
    state: Arc<OriginState>,
    local_addr: SocketAddr,
    url: String,
    token: CancellationToken,
    join_handle: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl TestServer {
    /// Binds `0.0.0.0:<port>` (`0` for an ephemeral port) and starts serving.
    pub async fn start(message: impl Into<String>, pod_ip: &str, port: u16) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HarnessError::SocketBind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| HarnessError::SocketBind { addr, source })?;

        let url = format!("http://{}", advertised_authority(pod_ip, local_addr.port()));
        tracing::info!("Test server listening on {local_addr}, advertised as {url}");

        let state = Arc::new(OriginState {
            message: message.into(),
            counter: AtomicU64::new(0),
        });
        let app = Router::new()
            .fallback(handle_request)
            .with_state(state.clone());

        let token = CancellationToken::new();
        let join_handle = tokio::task::spawn({
            let token = token.clone();
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(token.cancelled_owned())
                    .await
            }
        });

        Ok(Self {
            state,
            local_addr,
            url,
            token,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    /// `http://<podIP>:<boundPort>`, without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn request_count(&self) -> u64 {
        self.state.counter.load(Ordering::SeqCst)
    }

    /// Only meaningful while no request is in flight.
    pub fn reset_request_count(&self) {
        self.state.counter.store(0, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops accepting connections and waits for in-flight requests to drain.
    ///
    /// Calling this more than once is a no-op. Failures are logged, never returned.
    pub async fn shutdown(&self) {
        self.token.cancel();

        let Some(join_handle) = self.join_handle.lock().await.take() else {
            return;
        };
        match join_handle.await {
            Ok(Ok(())) => {
                tracing::info!("The test server on {} normally exit now", self.local_addr)
            }
            Ok(Err(e)) => {
                tracing::warn!(error=?e, "Test server on {} exited with error", self.local_addr)
            }
            Err(e) => {
                tracing::warn!(error=?e, "Test server task on {} panicked", self.local_addr)
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn handle_request(
    State(state): State<Arc<OriginState>>,
    method: Method,
    uri: Uri,
) -> impl IntoResponse {
    let n = state.counter.fetch_add(1, Ordering::SeqCst) + 1;
    let response = TestServerResponse {
        message: state.message.clone(),
        request_id: n,
        timestamp: chrono::Utc::now().timestamp(),
        server_hits: n,
    };
    tracing::debug!(request_id = n, %method, %uri, "Test server got request");

    (
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, CACHE_CONTROL_VALUE),
            (header::CONTENT_TYPE, CONTENT_TYPE_JSON),
        ],
        Json(response),
    )
}

fn advertised_authority(pod_ip: &str, port: u16) -> String {
    if pod_ip.parse::<Ipv6Addr>().is_ok() {
        format!("[{pod_ip}]:{port}")
    } else {
        format!("{pod_ip}:{port}")
    }
}
