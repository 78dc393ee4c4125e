use clap::Parser;
use caching_testsuite::settings::DEFAULT_TEST_SERVER_MESSAGE;

/// Standalone origin server for exercising the proxy from another pod.
///
/// Listens on `TEST_SERVER_PORT` (default 9090) and advertises itself on `POD_IP`.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Message echoed in every response body
    #[arg(long, default_value = DEFAULT_TEST_SERVER_MESSAGE)]
    pub message: String,
}
