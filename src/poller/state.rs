//! Coordinator lifecycle states
//!
//! ```text
//! Initial --(no identity)--> Registering --(register ok)--> Running
//! Initial --(identity exists)--> Running
//! any state --(unrecoverable error)--> FatalExceptionOccurred   [terminal]
//! ```

use super::error::CoordinatorError;

/// Operations whose validity depends on the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Initialize,
    Register,
    PollService,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Initialize => "initialize",
            Operation::Register => "register",
            Operation::PollService => "poll_service",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum CoordinatorState {
    #[default]
    Initial,
    Registering,
    Running,
    /// Terminal; carries the error that ended the coordinator
    FatalExceptionOccurred(CoordinatorError),
}

impl CoordinatorState {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorState::Initial => "Initial",
            CoordinatorState::Registering => "Registering",
            CoordinatorState::Running => "Running",
            CoordinatorState::FatalExceptionOccurred(_) => "FatalExceptionOccurred",
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, CoordinatorState::Running)
    }

    pub fn is_started(&self) -> bool {
        matches!(self, CoordinatorState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::FatalExceptionOccurred(_))
    }

    /// Dispatch table: which operation each state accepts
    pub fn supports(&self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (CoordinatorState::Initial, Operation::Initialize)
                | (CoordinatorState::Registering, Operation::Register)
                | (CoordinatorState::Running, Operation::PollService)
        )
    }

    pub fn fatal_error(&self) -> Option<&CoordinatorError> {
        match self {
            CoordinatorState::FatalExceptionOccurred(err) => Some(err),
            _ => None,
        }
    }
}
