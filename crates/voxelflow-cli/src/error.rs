//! Error types for the VoxelFlow CLI.

use thiserror::Error;
use voxelflow::VoxelError;

/// CLI result type alias.
pub type CliResult<T> = Result<T, CliError>;

/// CLI error type.
#[derive(Error, Debug)]
pub enum CliError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed units or coordinates file.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid command-line argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error reported by the library.
    #[error(transparent)]
    VoxelFlow(#[from] VoxelError),

    /// Blocking task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<toml::de::Error> for CliError {
    fn from(e: toml::de::Error) -> Self {
        CliError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Parse(e.to_string())
    }
}

impl From<voxelflow::CycleError> for CliError {
    fn from(e: voxelflow::CycleError) -> Self {
        CliError::VoxelFlow(e.into())
    }
}

impl From<tokio::task::JoinError> for CliError {
    fn from(e: tokio::task::JoinError) -> Self {
        CliError::Task(e.to_string())
    }
}
