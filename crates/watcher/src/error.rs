//! Error types for watch lifecycle, backends and configuration

use std::path::PathBuf;

/// Result type for watch operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors surfaced to the owner of a watch
///
/// Lifecycle misuse (`AlreadyRunning`, `NotRunning`) and `Initialization`
/// are reported synchronously. `StartFailure` arrives with the start
/// result, `Runtime` through the dispatch boundary's error delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The watch could not be set up; create a new one
    #[error("Watch failed to initialize properly: {0}. Try creating a new watch.")]
    Initialization(String),

    #[error("This watch cannot be started, because it is already running.")]
    AlreadyRunning,

    #[error("This watch cannot be stopped, because it is not running.")]
    NotRunning,

    /// The backend could not subscribe to OS notifications
    #[error("Unable to start watching that directory: {0}")]
    StartFailure(String),

    /// The backend failed after it started
    #[error("{0}")]
    Runtime(String),
}

/// Failures establishing an OS-level subscription
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Path does not exist: {}", .0.display())]
    MissingPath(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    /// Platform API failure with its formatted message
    #[error("{0}")]
    Os(String),
}

/// Failures loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Well-formed but unusable values
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}
