//! Registration state machine and error taxonomy.
//!
//! A registration for one (group, user) pair moves through:
//!
//! ```text
//! Unregistered --FormSubmitted--> Submitted --VerificationScheduled--> PendingVerification
//!                                     |                                       |
//!                                     +---------------Persisted---------------+--> Registered
//! ```
//!
//! `AlreadyRegistered` and `Failed` are absorbing and may be entered from any
//! non-terminal state.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic message shown to users for failures they cannot act on.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "internal error occurred, please contact the server administrator";

// ============================================================================
// State machine
// ============================================================================

/// Where a single registration attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    /// No form has been submitted yet.
    Unregistered,
    /// Form data was received and saved as a pending submission.
    Submitted,
    /// A verification code was sent and the user must present it.
    PendingVerification,
    /// The member record was written.
    Registered,
    /// A member record already existed.
    AlreadyRegistered,
    /// The attempt ended with an error.
    Failed,
}

impl RegistrationState {
    /// Returns true if no further events may be applied.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Registered | Self::AlreadyRegistered | Self::Failed)
    }

    /// Applies an event, returning the next state.
    pub fn apply(self, event: RegistrationEvent) -> Result<Self, InvalidTransition> {
        use RegistrationEvent as E;
        use RegistrationState as S;

        if self.is_terminal() {
            return Err(InvalidTransition {
                from: self,
                event,
                reason: "registration attempt already ended".into(),
            });
        }

        match (self, event) {
            (S::Unregistered, E::FormSubmitted) => Ok(S::Submitted),
            (S::Submitted, E::VerificationScheduled) => Ok(S::PendingVerification),
            (S::Submitted | S::PendingVerification, E::Persisted) => Ok(S::Registered),
            (_, E::DuplicateDetected) => Ok(S::AlreadyRegistered),
            (_, E::Failed) => Ok(S::Failed),
            (from, event) => Err(InvalidTransition {
                from,
                event,
                reason: match event {
                    E::FormSubmitted => "form was already submitted".into(),
                    E::VerificationScheduled => "verification requires a submitted form".into(),
                    _ => "member data must be submitted before persisting".into(),
                },
            }),
        }
    }
}

/// Events that drive [`RegistrationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationEvent {
    FormSubmitted,
    VerificationScheduled,
    Persisted,
    DuplicateDetected,
    Failed,
}

/// Error returned when an event is not valid for the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RegistrationState,
    pub event: RegistrationEvent,
    pub reason: String,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition: cannot apply '{:?}' to registration in state '{:?}': {}",
            self.event, self.from, self.reason
        )
    }
}

impl std::error::Error for InvalidTransition {}

// ============================================================================
// Errors
// ============================================================================

/// Boxed collaborator error carried by [`RegistrationError::Internal`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure of a registration workflow step.
///
/// Everything except `Internal` is safe to show to the user verbatim.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistrationError {
    /// Lookup miss. Expired and never-existing entries are not distinguished.
    #[error("not found")]
    NotFound,

    /// The member is already registered.
    #[error("you're already registered!")]
    AlreadyExists,

    /// User input was rejected.
    #[error("{0}")]
    Validation(String),

    /// A verification code could not be allocated. Retryable.
    #[error("cannot allocate a verification code right now, please try again")]
    Allocation,

    /// A collaborator failed unexpectedly.
    #[error("{context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl RegistrationError {
    pub fn internal(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Internal {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Returns true if the error must not be shown to the user.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Text that may be shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal { .. } => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<InvalidTransition> for RegistrationError {
    fn from(err: InvalidTransition) -> Self {
        Self::internal("registration state machine", err)
    }
}
