//! Error types for kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Backend errors
    #[error("Build backend not found: {path}")]
    BackendUnavailable { path: String },

    #[error("Container name {name} is still in use after cleanup: {stderr}")]
    ContainerNameConflict { name: String, stderr: String },

    #[error("Failed to create working container {name} from {image}: {stderr}")]
    ContainerCreate {
        name: String,
        image: String,
        stderr: String,
    },

    #[error("Build step failed: {command}, exit code: {code}\n{output}")]
    StepExecutionFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("Source path does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("Failed to parse image listing: {0}")]
    ImageListParse(String),

    // Session errors
    #[error("Cannot {operation} on a build session that is {state}")]
    InvalidSessionState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Cache prefix must not be empty")]
    EmptyCachePrefix,

    // Configuration errors
    #[error("Spec file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Invalid build spec at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Module {0} is not configured in the build spec")]
    ModuleNotConfigured(String),

    #[error("No build spec entry for {module} version {version}")]
    UnknownModuleVersion { module: String, version: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // General errors
    #[error("{0}")]
    User(String),
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether this error halts a build session.
    ///
    /// Cache lookup and cleanup failures never reach the caller as errors,
    /// so everything that does surface is fatal except invalid session use.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidSessionState { .. } | Self::User(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::BackendUnavailable { .. } => {
                Some("Install buildah or set [buildah] path in the build spec")
            }
            Self::ContainerNameConflict { .. } => {
                Some("Remove the stale container with: buildah rm <name>")
            }
            Self::ConfigNotFound(_) => Some("Pass --spec <path> or set KILN_SPEC"),
            Self::SourceNotFound(_) => Some("Check [valkey.runtime] resources in the build spec"),
            Self::ModuleNotConfigured(_) | Self::UnknownModuleVersion { .. } => {
                Some("Add the version under [modules.<name>.versions] in the build spec")
            }
            _ => None,
        }
    }
}
