//! Errors raised by the host environment layer.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Failure inside the isolation host.
///
/// These are environment-level failures. Callers building on the host map
/// them onto their own taxonomy (for example, `Unloaded` becomes a
/// "disposed" error one layer up).
#[derive(Debug, Error)]
pub enum HostError {
    /// The environment was unloaded; no further work can be dispatched to it.
    #[error("environment `{name}` has been unloaded")]
    Unloaded { name: String },

    /// Attempted to unload the process-wide home environment.
    #[error("the home environment cannot be unloaded")]
    HomeEnvironment,

    /// A module file does not exist on disk.
    #[error("module file `{}` does not exist", path.display())]
    NotFound { path: PathBuf },

    /// No loaded module and no resolution hook could satisfy a reference.
    #[error("unable to resolve module `{name}` in environment `{environment}`")]
    Unresolved { name: String, environment: String },

    /// The bytes handed to the host are not a module image.
    #[error("malformed module image: {reason}")]
    MalformedImage { reason: String },

    /// A remote object handle points at an object that was released, or at
    /// an object of a different type.
    #[error("remote object #{id} is not available in environment `{environment}`")]
    ObjectUnavailable { id: u64, environment: String },

    /// Code running inside an environment panicked.
    #[error("panic inside environment `{environment}`: {message}")]
    Panicked { environment: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        HostError::MalformedImage {
            reason: reason.into(),
        }
    }
}
