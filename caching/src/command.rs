//! Execution of the external tools (`kind`, `podman`, `helm`, `kubectl`, `cargo`).

use std::{ffi::OsString, fmt, process::Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{OpsError, Result};

/// A command line, kept as data so it can be logged and asserted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, OsString)>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            envs: vec![],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        cmd.kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turns a non-zero exit into [`OpsError::CommandFailed`].
    pub fn check(self, cmd: &Cmd) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(OpsError::CommandFailed {
                cmd: cmd.to_string(),
                status: self.status,
                stderr: self.stderr,
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `cmd` with the terminal attached, failing on a non-zero exit.
    async fn run(&self, cmd: &Cmd) -> Result<()>;

    /// Runs `cmd` and captures its output. A non-zero exit is not an error here.
    async fn output(&self, cmd: &Cmd) -> Result<CommandOutput>;

    /// Whether `cmd` exits successfully. Output is discarded.
    async fn succeeds(&self, cmd: &Cmd) -> Result<bool> {
        Ok(self.output(cmd).await?.success)
    }
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &Cmd) -> Result<()> {
        tracing::info!("Running `{cmd}`");
        let status = cmd
            .to_command()
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|source| OpsError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(OpsError::CommandFailed {
                cmd: cmd.to_string(),
                status: status.to_string(),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    async fn output(&self, cmd: &Cmd) -> Result<CommandOutput> {
        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| OpsError::Spawn {
                cmd: cmd.to_string(),
                source,
            })?;

        let output = CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            "execute command:\n{cmd}\n{}\nstdout:\n{}\nstderr:\n{}",
            output.status,
            output.stdout,
            output.stderr
        );
        Ok(output)
    }
}
