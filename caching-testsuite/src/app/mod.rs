mod proxy_client;
mod test_server;

pub use proxy_client::{cluster_proxy_url, ProxyClient, ProxyResponse, REQUEST_TIMEOUT, SQUID_PORT};
pub use test_server::{TestServer, TestServerResponse, CACHE_CONTROL_VALUE, CONTENT_TYPE_JSON};
