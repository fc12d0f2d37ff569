//! Error type for toolkit operations.

use std::fmt;

use iso_host::HostError;
use thiserror::Error;

/// Result alias for toolkit operations.
pub type ToolkitResult<T> = Result<T, ToolkitError>;

/// A fault raised inside another environment, carried back by value.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FaultRecord {
    /// Type name of the original error (or `"panic"`).
    pub type_name: String,
    pub message: String,
}

impl FaultRecord {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        FaultRecord {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Capture an error, keeping its concrete type name.
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        FaultRecord::new(std::any::type_name::<E>(), error.to_string())
    }

    /// Capture a panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        FaultRecord::new("panic", iso_host::panic_message(payload))
    }
}

impl fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Failure of a toolkit operation.
#[derive(Debug, Error)]
pub enum ToolkitError {
    /// A required value was missing or empty.
    #[error("required argument `{name}` is missing")]
    NullArgument { name: &'static str },

    /// An argument was present but unusable.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A file or module could not be found.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The object, or the environment behind it, has been torn down.
    #[error("`{object}` has been disposed")]
    ObjectDisposed { object: String },

    /// A load strategy value outside the known set.
    #[error("unsupported load strategy `{value}`")]
    UnsupportedStrategy { value: String },

    /// Work inside another environment failed.
    #[error("remote fault: {}", join_faults(.faults))]
    RemoteFault { faults: Vec<FaultRecord> },

    /// Remote async work was canceled.
    #[error("remote operation was canceled")]
    Canceled,

    #[error(transparent)]
    Host(HostError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_faults(faults: &[FaultRecord]) -> String {
    faults
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ToolkitError {
    pub(crate) fn disposed(object: impl Into<String>) -> Self {
        ToolkitError::ObjectDisposed {
            object: object.into(),
        }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        ToolkitError::NotFound { what: what.into() }
    }

    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ToolkitError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// Whether this is [`ToolkitError::ObjectDisposed`].
    pub fn is_disposed(&self) -> bool {
        matches!(self, ToolkitError::ObjectDisposed { .. })
    }
}

impl From<HostError> for ToolkitError {
    fn from(error: HostError) -> Self {
        match error {
            HostError::Unloaded { name } => ToolkitError::ObjectDisposed {
                object: format!("environment `{name}`"),
            },
            HostError::NotFound { path } => ToolkitError::NotFound {
                what: path.display().to_string(),
            },
            HostError::Unresolved { name, .. } => ToolkitError::NotFound { what: name },
            HostError::Panicked { message, .. } => ToolkitError::RemoteFault {
                faults: vec![FaultRecord::new("panic", message)],
            },
            HostError::Io(e) => ToolkitError::Io(e),
            other => ToolkitError::Host(other),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
