use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Errors surfaced by the harness to the test that drives it.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to bind test server listener on {addr}: {source}")]
    SocketBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Timed out after {timeout:?} waiting for {what}, last observed: {last_observed}")]
    ReadinessTimeout {
        what: String,
        timeout: Duration,
        last_observed: String,
    },

    #[error("Kubernetes API call `{operation}` failed: {source}")]
    ClusterApi {
        operation: String,
        #[source]
        source: kube::Error,
    },

    #[error("Assertion failed: {0}")]
    AssertionFailure(String),
}

impl HarnessError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::AssertionFailure(msg.into())
    }

    pub fn cluster_api(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::ClusterApi {
            operation: operation.into(),
            source,
        }
    }
}

/// Fails with an [`HarnessError::AssertionFailure`] when the condition does not hold.
#[macro_export]
macro_rules! ensure_that {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($crate::error::HarnessError::AssertionFailure(format!($($arg)+)));
        }
    };
}
