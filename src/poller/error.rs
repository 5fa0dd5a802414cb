//! Error types for the poller coordinator

use std::fmt;
use std::sync::Arc;

/// Result type alias for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Errors that can occur while coordinating a remote poller
///
/// Sources are shared behind `Arc` so the terminal `FatalExceptionOccurred`
/// state can keep the error while `initialize()` hands the same value back
/// to its caller.
#[derive(Debug, Clone)]
pub enum CoordinatorError {
    /// A required collaborator is missing or unusable at startup
    Configuration(String),

    /// The backend was unreachable or rejected the registration
    Registration(Arc<anyhow::Error>),

    /// A backend call other than registration failed
    Backend(Arc<anyhow::Error>),

    /// A single service check failed and aborted the scan pass
    CheckExecution {
        service_id: u32,
        source: Arc<anyhow::Error>,
    },

    /// The operation is not supported in the current state
    IllegalState {
        operation: &'static str,
        state: &'static str,
    },
}

impl CoordinatorError {
    pub fn registration(err: anyhow::Error) -> Self {
        CoordinatorError::Registration(Arc::new(err))
    }

    pub fn backend(err: anyhow::Error) -> Self {
        CoordinatorError::Backend(Arc::new(err))
    }

    pub fn check_execution(service_id: u32, err: anyhow::Error) -> Self {
        CoordinatorError::CheckExecution {
            service_id,
            source: Arc::new(err),
        }
    }
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorError::Configuration(msg) => write!(f, "invalid poller configuration: {msg}"),
            CoordinatorError::Registration(err) => write!(f, "unable to register: {err:#}"),
            CoordinatorError::Backend(err) => write!(f, "poller backend call failed: {err:#}"),
            CoordinatorError::CheckExecution { service_id, source } => {
                write!(f, "check for service {service_id} failed: {source:#}")
            }
            CoordinatorError::IllegalState { operation, state } => {
                write!(f, "cannot call {operation} in state {state}")
            }
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoordinatorError::Registration(err)
            | CoordinatorError::Backend(err)
            | CoordinatorError::CheckExecution { source: err, .. } => Some(&***err),
            _ => None,
        }
    }
}
