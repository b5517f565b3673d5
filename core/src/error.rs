use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("A command is already running.")]
    AlreadyRunning,
    #[error("No command provided.")]
    EmptyCommand,
    #[error("failed to provision instrumentation workspace: {0}")]
    Provision(#[source] io::Error),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    pub(crate) fn spawn(program: &str, source: io::Error) -> Self {
        Self::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to read instrumentation payload {}: {source}", path.display())]
    Payload {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
