use std::{collections::BTreeSet, time::Duration};

use super::{parse_body, validate_cache_headers, validate_cache_hit, validate_server_hit};
use crate::{
    app::{ProxyClient, TestServer},
    buster, ensure_that,
    error::Result,
};

pub const CONCURRENT_REQUESTS: usize = 50;

const PAUSE_BETWEEN_REQUESTS: Duration = Duration::from_millis(100);

/// Requests one fresh URL `1 + repeats` times and checks that only the first reached the
/// origin while every later response is a byte-identical replay of it.
pub async fn assert_same_url_cached(
    server: &TestServer,
    client: &ProxyClient,
    repeats: usize,
) -> Result<()> {
    let initial = server.request_count();
    let url = format!("{}/?{}", server.url(), buster::generate("cache-basic"));

    tracing::info!("Making the first HTTP request through the proxy to {url}");
    let first = client.get(&url).await?;
    let first_body = parse_body(&first)?;
    validate_server_hit(&first_body, initial + 1, server)?;
    validate_cache_headers(&first)?;

    for attempt in 1..=repeats {
        tokio::time::sleep(PAUSE_BETWEEN_REQUESTS).await;

        tracing::info!("Repeating the request for the same URL ({attempt}/{repeats})");
        let cached = client.get(&url).await?;
        let cached_body = parse_body(&cached)?;
        validate_cache_hit(&first_body, &cached_body, initial + 1)?;

        let hits = hits_since(initial, server.request_count())?;
        ensure_that!(
            hits == 1,
            "Server should still have received only 1 request, counted {hits}"
        );
        ensure_that!(
            cached.body == first.body,
            "Cached response should be identical to original: `{}` vs `{}`",
            String::from_utf8_lossy(&cached.body),
            String::from_utf8_lossy(&first.body)
        );
        validate_cache_headers(&cached)?;
    }

    Ok(())
}

/// Origin hits between two counter readings. A counter that went backwards was reset
/// while the property ran.
fn hits_since(initial: u64, count: u64) -> Result<u64> {
    ensure_that!(
        count >= initial,
        "Request counter went back from {initial} to {count}, was it reset during the check?"
    );
    Ok(count - initial)
}

/// Two URLs that differ in path and query must each reach the origin.
pub async fn assert_distinct_urls_segregated(
    server: &TestServer,
    client: &ProxyClient,
) -> Result<()> {
    let buster = buster::generate("urls");
    let initial = server.request_count();

    let url1 = format!("{}/endpoint1?{buster}&endpoint=1", server.url());
    parse_body(&client.get(&url1).await?)?;
    let count = server.request_count();
    ensure_that!(
        count == initial + 1,
        "First URL should reach the server once, counter went from {initial} to {count}"
    );

    let url2 = format!("{}/endpoint2?{buster}&endpoint=2", server.url());
    parse_body(&client.get(&url2).await?)?;
    let count = server.request_count();
    ensure_that!(
        count == initial + 2,
        "Different URLs should not be cached together, counter went from {initial} to {count}"
    );

    Ok(())
}

/// Fires `requests` concurrent GETs for one URL and returns how many reached the origin.
///
/// The proxy may or may not collapse concurrent misses, so only `1 <= k <= requests` is
/// required. The ids handed out by the origin must form the gapless range after `initial`.
pub async fn assert_counter_monotonic_under_concurrency(
    server: &TestServer,
    client: &ProxyClient,
    requests: usize,
) -> Result<u64> {
    let initial = server.request_count();
    let url = format!("{}/concurrency?{}", server.url(), buster::generate("concurrency"));

    let responses = futures::future::join_all((0..requests).map(|_| client.get(&url))).await;

    let mut ids = BTreeSet::new();
    for response in responses {
        let body = parse_body(&response?)?;
        ensure_that!(
            body.request_id == body.server_hits,
            "request_id {} and server_hits {} differ",
            body.request_id,
            body.server_hits
        );
        ids.insert(body.request_id);
    }

    let misses = hits_since(initial, server.request_count())?;
    ensure_that!(
        misses >= 1 && misses <= requests as u64,
        "Expected between 1 and {requests} origin hits, counted {misses}"
    );

    let expected: BTreeSet<u64> = (initial + 1..=initial + misses).collect();
    ensure_that!(
        ids == expected,
        "Observed request ids {ids:?} do not match the {misses} origin hits after {initial}"
    );

    tracing::info!("{requests} concurrent requests caused {misses} origin hits");
    Ok(misses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    #[test]
    fn test_hits_since_counts_forward() {
        assert_eq!(hits_since(5, 7).unwrap(), 2);
        assert_eq!(hits_since(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_hits_since_rejects_reset_counter() {
        let err = hits_since(5, 3).unwrap_err();
        assert!(matches!(err, HarnessError::AssertionFailure(_)), "got {err:?}");
        assert!(err.to_string().contains("went back from 5 to 3"));
    }
}
