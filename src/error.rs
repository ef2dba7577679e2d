use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while loading, validating and launching servers.
///
/// None of these cross a descriptor boundary: the orchestrator logs them and moves on
/// to the next server. Only `ConfigNotFound` and `ConfigParse` on the top-level document
/// end the run.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("failed to parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("server {server}: missing required field(s): {}", .fields.join(", "))]
    MissingField { server: String, fields: Vec<String> },
    #[error("server {server}: invalid field {field}: {message}")]
    InvalidField {
        server: String,
        field: String,
        message: String,
    },
    #[error("working directory does not exist: {0}")]
    WorkingDirMissing(String),
    #[error("environment activation script not found: {}", .0.display())]
    ActivationMissing(PathBuf),
    #[error("script not found: {}", .0.display())]
    ScriptMissing(PathBuf),
    #[error("process {pid} survived termination")]
    KillFailed { pid: u32 },
    #[error("failed to open window: {0}")]
    Launch(String),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl LaunchError {
    /// Id, or `#n` label, of the server entry a config error belongs to.
    pub fn server(&self) -> Option<&str> {
        match self {
            LaunchError::MissingField { server, .. } | LaunchError::InvalidField { server, .. } => {
                Some(server)
            }
            _ => None,
        }
    }
}

pub type Result<T, E = LaunchError> = std::result::Result<T, E>;
