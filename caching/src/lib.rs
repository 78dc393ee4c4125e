#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Lifecycle tasks for the local Squid caching proxy environment: a kind cluster, the
//! Squid image, the Helm release and the e2e suite that checks it.

pub mod command;
pub mod config;
pub mod error;
pub mod helm;
pub mod image;
pub mod kind;
pub mod targets;

use command::CommandRunner;
use config::OpsConfig;

/// Entry point of every task: the config plus the way commands get executed.
pub struct Ops<R> {
    runner: R,
    config: OpsConfig,
}

impl<R: CommandRunner> Ops<R> {
    pub fn new(runner: R, config: OpsConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &OpsConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}
