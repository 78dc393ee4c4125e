use thiserror::Error;

pub type Result<T, E = OpsError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Failed to spawn `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{cmd}` exited with {status}{}", stderr_suffix(.stderr))]
    CommandFailed {
        cmd: String,
        status: String,
        stderr: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: usize },

    #[error("Failed to prepare {what}: {source}")]
    Io {
        what: String,
        #[source]
        source: std::io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(", stderr: {stderr}")
    }
}
