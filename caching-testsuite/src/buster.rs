//! Cache-busting query strings.
//!
//! The proxy under test is shared by every test, every worker and every run, so a URL
//! used by one test may already be cached by another. Appending a fresh buster string
//! guarantees the first request of a test is a cache miss. The string combines five
//! entropy sources: the test name, a nanosecond timestamp, the host name, 64 random
//! bits and the run seed. The random bits alone make a collision negligible, the other
//! parts keep the string debuggable when reading proxy access logs.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    OnceLock,
};

use url::form_urlencoded;

pub const RUN_SEED_ENV: &str = "HARNESS_RANDOM_SEED";

static LAST_NANOS: AtomicU64 = AtomicU64::new(0);
static RUN_SEED: OnceLock<u64> = OnceLock::new();

/// Returns `test=<name>&t=<nanos>&host=<hostname>&rand=<hex>&seed=<seed>`. Never fails.
pub fn generate(test_name: &str) -> String {
    let nanos = monotonic_nanos();
    let rand = random_hex(nanos, getrandom::fill);
    compose(test_name, nanos, &hostname(), &rand, run_seed())
}

/// The seed of this test run, fixed for the lifetime of the process.
///
/// Set `HARNESS_RANDOM_SEED` to reproduce the buster strings of an earlier run.
pub fn run_seed() -> u64 {
    *RUN_SEED.get_or_init(|| {
        let seed = std::env::var(RUN_SEED_ENV)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .or_else(|| getrandom::u64().ok())
            .unwrap_or_else(monotonic_nanos);
        tracing::info!("Running with random seed {seed}");
        seed
    })
}

fn compose(test_name: &str, nanos: u64, host: &str, rand: &str, seed: u64) -> String {
    let test_name: String = form_urlencoded::byte_serialize(test_name.as_bytes()).collect();
    let host: String = form_urlencoded::byte_serialize(host.as_bytes()).collect();
    format!("test={test_name}&t={nanos}&host={host}&rand={rand}&seed={seed}")
}

/// Wall-clock nanoseconds, bumped so that it strictly increases within the process.
fn monotonic_nanos() -> u64 {
    let now = chrono::Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or_default();

    let prev = match LAST_NANOS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last.saturating_add(1)))
    }) {
        Ok(prev) | Err(prev) => prev,
    };
    now.max(prev.saturating_add(1))
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// 16 hex chars from `fill`, or derived from `nanos` when the RNG is unavailable.
fn random_hex(
    nanos: u64,
    fill: impl FnOnce(&mut [u8]) -> Result<(), getrandom::Error>,
) -> String {
    let mut bytes = [0u8; 8];
    match fill(&mut bytes) {
        Ok(()) => hex::encode(bytes),
        Err(e) => {
            tracing::warn!(error=%e, "Random source unavailable, falling back to timestamp");
            format!("{nanos:016x}")
        }
    }
}
