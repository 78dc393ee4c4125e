//! Assertions on the behavior of the proxy under test.
//!
//! Every check returns [`crate::error::HarnessError::AssertionFailure`] instead of
//! panicking so that the calling test can attach its own context and still tear its
//! fixtures down.

use http::{header, StatusCode};

use crate::{
    app::{ProxyResponse, TestServer, TestServerResponse, CONTENT_TYPE_JSON},
    ensure_that,
    error::Result,
};

mod caching;
mod health;

pub use caching::{
    assert_counter_monotonic_under_concurrency, assert_distinct_urls_segregated,
    assert_same_url_cached, CONCURRENT_REQUESTS,
};
pub use health::{
    check_config_map, check_deployment_configured, check_namespace_active, check_pod_containers,
    check_service_configured, check_structural_health, deployment_is_ready,
    pod_is_running_and_ready, wait_deployment_ready, wait_pods_running_and_ready,
    wait_service_endpoints_ready, SquidExpectations,
};

pub fn validate_status_ok(response: &ProxyResponse) -> Result<()> {
    ensure_that!(
        response.status == StatusCode::OK,
        "Expected status 200, got {} with body `{}`",
        response.status,
        String::from_utf8_lossy(&response.body)
    );
    Ok(())
}

/// The response must come from the origin, as its `expected_request_id`-th request.
pub fn validate_server_hit(
    response: &TestServerResponse,
    expected_request_id: u64,
    server: &TestServer,
) -> Result<()> {
    ensure_that!(
        response.request_id == expected_request_id,
        "Request should have request_id {expected_request_id}, got {}",
        response.request_id
    );
    let count = server.request_count();
    ensure_that!(
        count == expected_request_id,
        "Server should have received {expected_request_id} requests, counted {count}"
    );
    Ok(())
}

/// `cached` must be a replay of `original`.
pub fn validate_cache_hit(
    original: &TestServerResponse,
    cached: &TestServerResponse,
    expected_request_id: u64,
) -> Result<()> {
    ensure_that!(
        cached.request_id == expected_request_id,
        "Cached response should have request_id {expected_request_id}, got {}",
        cached.request_id
    );
    ensure_that!(
        cached.timestamp == original.timestamp,
        "Cached response should preserve original timestamp {}, got {}",
        original.timestamp,
        cached.timestamp
    );
    ensure_that!(
        cached.server_hits == original.server_hits,
        "Cached response should show server_hits {}, got {}",
        original.server_hits,
        cached.server_hits
    );
    Ok(())
}

pub fn validate_cache_headers(response: &ProxyResponse) -> Result<()> {
    let cache_control = response.header_str(header::CACHE_CONTROL).unwrap_or_default();
    ensure_that!(
        cache_control.contains("max-age=300"),
        "Response should have Cache-Control with max-age=300, got `{cache_control}`"
    );
    let content_type = response.header_str(header::CONTENT_TYPE).unwrap_or_default();
    ensure_that!(
        content_type == CONTENT_TYPE_JSON,
        "Response should have Content-Type {CONTENT_TYPE_JSON}, got `{content_type}`"
    );
    Ok(())
}

fn parse_body(response: &ProxyResponse) -> Result<TestServerResponse> {
    validate_status_ok(response)?;
    TestServerResponse::parse(&response.body)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue};

    use crate::error::HarnessError;

    use super::*;

    fn response(status: StatusCode, cache_control: Option<&'static str>, body: &str) -> ProxyResponse {
        let mut headers = HeaderMap::new();
        if let Some(value) = cache_control {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(value));
        }
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        ProxyResponse {
            status,
            headers,
            body: Bytes::from(body.to_owned()),
        }
    }

    fn origin(request_id: u64, timestamp: i64) -> TestServerResponse {
        TestServerResponse {
            message: "Hello from test server".to_owned(),
            request_id,
            timestamp,
            server_hits: request_id,
        }
    }

    #[test]
    fn test_cache_hit_accepts_replay() {
        let first = origin(1, 1_700_000_000);
        assert!(validate_cache_hit(&first, &first.clone(), 1).is_ok());
    }

    #[test]
    fn test_cache_hit_rejects_fresh_origin_response() {
        let first = origin(1, 1_700_000_000);
        let second = origin(2, 1_700_000_000);
        let err = validate_cache_hit(&first, &second, 1).unwrap_err();
        assert!(matches!(err, HarnessError::AssertionFailure(_)));
        assert!(err.to_string().contains("request_id 1, got 2"));
    }

    #[test]
    fn test_cache_hit_rejects_new_timestamp() {
        let first = origin(1, 1_700_000_000);
        let second = origin(1, 1_700_000_001);
        assert!(validate_cache_hit(&first, &second, 1).is_err());
    }

    #[test]
    fn test_cache_headers() {
        let ok = response(StatusCode::OK, Some("public, max-age=300"), "{}");
        assert!(validate_cache_headers(&ok).is_ok());

        let missing = response(StatusCode::OK, None, "{}");
        assert!(validate_cache_headers(&missing).is_err());

        let wrong = response(StatusCode::OK, Some("no-store"), "{}");
        assert!(validate_cache_headers(&wrong).is_err());
    }

    #[test]
    fn test_status_must_be_ok() {
        let bad_gateway = response(StatusCode::BAD_GATEWAY, None, "upstream unreachable");
        let err = parse_body(&bad_gateway).unwrap_err();
        assert!(err.to_string().contains("502"), "{err}");
        assert!(err.to_string().contains("upstream unreachable"), "{err}");
    }
}
